use std::path::Path;

use anyhow::{anyhow, Context, Result};

use psoquest::quest::{Quest, QuestValidationSummary};

fn has_extension(filename: &str, extension: &str) -> bool {
    filename.to_lowercase().ends_with(extension)
}

fn load_quest_for_info(args: &[String]) -> Result<(Quest, QuestValidationSummary)> {
    match args.len() {
        0 => Err(anyhow!("No quest file(s) given")),
        1 => {
            if !has_extension(&args[0], ".qst") {
                return Err(anyhow!(
                    "A single input file should be a .qst file. Otherwise, specify a .bin and .dat file."
                ));
            }
            println!("Reading quest from {}", &args[0]);
            Quest::from_qst_file(Path::new(&args[0]))
                .with_context(|| format!("Could not read a quest out of {}", &args[0]))
        }
        2 => {
            // which of the two is the bin and which is the dat comes from their extensions,
            // so they can be given in either order
            let (bin, dat) = if has_extension(&args[0], ".bin") && has_extension(&args[1], ".dat")
            {
                (&args[0], &args[1])
            } else if has_extension(&args[0], ".dat") && has_extension(&args[1], ".bin") {
                (&args[1], &args[0])
            } else {
                return Err(anyhow!(
                    "Two input files should be a .bin and a .dat file (in either order)."
                ));
            };
            println!("Reading quest from {} and {}", bin, dat);
            Quest::from_bindat_files(Path::new(bin), Path::new(dat))
                .with_context(|| format!("Could not read a quest out of {} and {}", bin, dat))
        }
        _ => Err(anyhow!(
            "Too many files. A quest is either one .qst file or a .bin/.dat pair"
        )),
    }
}

pub fn quest_info(args: &[String]) -> Result<()> {
    let (quest, summary) = load_quest_for_info(args)?;

    println!();
    println!("{}", quest.display_bin_info(&summary));
    println!();
    println!("{}", quest.display_dat_info(&summary));
    println!();

    // problems that the repair pass could not handle mean a non-zero exit, but only after
    // everything that could be shown has been shown
    summary
        .ensure_repaired()
        .context("The quest failed validation in a way that could not be repaired")?;

    Ok(())
}
