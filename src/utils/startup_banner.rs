const RESET: &str = "\x1b[0m";
const BANNER_COLOR: &str = "\x1b[38;5;37m";
const DIM_GRAY: &str = "\x1b[2;90m";
const BANNER: &str = r#"
  _ _     _            _ _       _
 | (_) __| | __ _ _ __| (_)_ __ | | __
 | | |/ _` |/ _` | '__| | | '_ \| |/ /
 | | | (_| | (_| | |  | | | | | |   <
 |_|_|\__,_|\__,_|_|  |_|_|_| |_|_|\_\
"#;
const APP_DESCRIPTION: &str =
    "Single-client TCP listener that keeps the latest sensor reading at hand.";
const LIABILITY_NOTICE: &str =
    "MIT License disclaimer: software is provided \"AS IS\", without warranty or liability.";

pub fn print_startup_banner() {
    println!("{BANNER_COLOR}{BANNER}{RESET}");
    println!(
        "{} v{} | build {} ({})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("LIDARLINK_BUILD_DATE_UTC"),
        env!("LIDARLINK_BUILD_PROFILE")
    );
    println!("{APP_DESCRIPTION}");
    println!("{DIM_GRAY}{LIABILITY_NOTICE}{RESET}");
    println!();
    println!("================================================================");
    println!();
}
