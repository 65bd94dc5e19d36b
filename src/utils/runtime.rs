use std::process;

pub const STARTUP_FAILURE_EXIT_CODE: i32 = 2;

pub fn ensure_posix_or_exit() {
    if !cfg!(unix) {
        exit_with_startup_error("unsupported platform: lidarlink targets POSIX systems");
    }
}

pub fn exit_with_startup_error(message: &str) -> ! {
    eprintln!("{message}");
    process::exit(STARTUP_FAILURE_EXIT_CODE);
}
