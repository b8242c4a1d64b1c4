mod process;

pub use process::{UNKNOWN_EXIT_CODE, exit_code, is_process_alive, kill_process};
