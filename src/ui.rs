//! Console output helpers shared by the library and the CLI

use colored::Colorize;

pub fn info(msg: &str) {
    println!("{} {}", "[INFO]".blue(), msg);
}

pub fn success(msg: &str) {
    println!("{} {}", "[OK]".green(), msg);
}

pub fn warn(msg: &str) {
    println!("{} {}", "[WARN]".yellow(), msg);
}

pub fn error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red(), msg);
}

/// Echo an external command line before running it
pub fn cmd(line: &str) {
    println!("{} {}", "[CMD]".cyan(), line);
}

/// Print a section header like `=== VM DELTA BACKUPS ===`
pub fn section(title: &str) {
    println!("\n=== {} ===", title);
}
