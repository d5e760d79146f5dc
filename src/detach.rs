use nix::libc::{exit, fork, getpgrp, getpid, setsid};
use nix::unistd::execvp;
use std::env::Args;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;

/// Detaches the daemon from its controlling terminal.
///
/// Forks, exits the parent so the child is inherited by pid 1, starts a
/// new session with `setsid` and re-executes the daemon without the detach
/// flag. The re-executed process carries on in the background.
pub fn detach_tty(args: Args) {
    let argv = args
        .skip(1)
        .filter(|arg| arg != "--detach" && arg != "-d")
        .map(|s| CString::new(s).unwrap())
        .collect::<Vec<_>>();

    let current_exe_path = CString::new(
        std::env::current_exe()
            .expect("Failed to get current exe path")
            .into_os_string()
            .as_bytes(),
    )
    .unwrap();

    unsafe {
        if getpgrp() == getpid() {
            match fork() {
                -1 => panic!("failed during fork"),
                0 => { /* child */ }
                _ => exit(0),
            }
        }

        // The new session has no controlling terminal, dissassociating the
        // daemon from the terminal it was launched from.
        if setsid() < 0 {
            panic!("failed to setsid");
        }
    }

    let mut full_argv = vec![current_exe_path.clone()];
    full_argv.extend(argv);
    execvp(&current_exe_path, &full_argv).unwrap();
}
