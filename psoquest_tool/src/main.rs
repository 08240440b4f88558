use std::env;

use anyhow::Result;

use psoquest_tool::convert::quest_convert;
use psoquest_tool::info::quest_info;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage() {
    println!("Inspects and converts PSO Gamecube Episode I & II quest files.\n");
    println!("USAGE:");
    println!("  psoquest_tool info <quest>");
    println!("  psoquest_tool convert <quest> <format> <outputs...>\n");
    println!("A <quest> is given as either one .qst file, or a .bin file and a .dat");
    println!("file together.\n");
    println!("Conversion formats and the outputs they produce:");
    println!("  raw_bindat   a decompressed .bin and .dat file");
    println!("  prs_bindat   a PRS-compressed .bin and .dat file");
    println!("  online_qst   a .qst file, as served to clients playing online");
    println!("  offline_qst  a .qst file in encrypted download form, as sent to");
    println!("               clients saving the quest to a memory card");
}

fn main() -> Result<()> {
    println!("psoquest_tool v{}\n", VERSION);

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(|arg| arg.to_lowercase()) {
        Some(command) if command == "info" => quest_info(&args[1..])?,
        Some(command) if command == "convert" => quest_convert(&args[1..])?,
        Some(command) => {
            println!("Unrecognized command: {}\n", command);
            print_usage();
        }
        None => print_usage(),
    }
    Ok(())
}
