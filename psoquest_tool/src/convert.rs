use std::path::Path;

use anyhow::{anyhow, Context, Result};

use psoquest::quest::Quest;

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum ConvertFormat {
    RawBinDat,
    PrsBinDat,
    OnlineQst,
    OfflineQst,
}

impl ConvertFormat {
    fn from_arg(arg: &str) -> Option<ConvertFormat> {
        use ConvertFormat::*;
        match arg.to_lowercase().as_str() {
            "raw_bindat" => Some(RawBinDat),
            "prs_bindat" => Some(PrsBinDat),
            "online_qst" => Some(OnlineQst),
            "offline_qst" => Some(OfflineQst),
            _ => None,
        }
    }

    fn description(self) -> &'static str {
        use ConvertFormat::*;
        match self {
            RawBinDat => "a decompressed .bin/.dat pair",
            PrsBinDat => "a PRS-compressed .bin/.dat pair",
            OnlineQst => "a .qst file for serving to online players",
            OfflineQst => "a .qst file in encrypted download form",
        }
    }

    fn produces_qst(self) -> bool {
        matches!(self, ConvertFormat::OnlineQst | ConvertFormat::OfflineQst)
    }
}

// the format keyword sits somewhere in the middle of the argument list, with input files on
// its left and output files on its right. scanning for it is what lets the command accept
// one or two files on either side without any up-front flags
fn collect_args(args: &[String]) -> Result<(&[String], ConvertFormat, &[String])> {
    if args.len() < 3 {
        return Err(anyhow!(
            "Conversion needs input file(s), a format, and output file(s)"
        ));
    }

    let mut found: Option<(usize, ConvertFormat)> = None;
    for (index, arg) in args.iter().enumerate() {
        if let Some(format) = ConvertFormat::from_arg(arg) {
            if found.is_some() {
                return Err(anyhow!("The conversion format was given more than once"));
            }
            found = Some((index, format));
        }
    }

    match found {
        None => Err(anyhow!("None of the arguments is a conversion format")),
        Some((0, _)) => Err(anyhow!("No input file(s) given before the format")),
        Some((index, _)) if index == args.len() - 1 => {
            Err(anyhow!("No output file(s) given after the format"))
        }
        Some((index, format)) => Ok((&args[0..index], format, &args[(index + 1)..])),
    }
}

fn check_output_count(format: ConvertFormat, output_files: &[String]) -> Result<()> {
    let expected = if format.produces_qst() { 1 } else { 2 };
    if output_files.len() != expected {
        return Err(anyhow!(
            "This conversion writes {} output file(s), but {} were given",
            expected,
            output_files.len()
        ));
    }
    Ok(())
}

fn load_quest(input_files: &[String]) -> Result<Quest> {
    let (quest, summary) = match input_files {
        [qst_file] => {
            println!("Reading quest from {}", qst_file);
            Quest::from_qst_file(Path::new(qst_file))
                .with_context(|| format!("Could not read a quest out of {}", qst_file))?
        }
        [bin_file, dat_file] => {
            println!("Reading quest from {} and {}", bin_file, dat_file);
            Quest::from_bindat_files(Path::new(bin_file), Path::new(dat_file)).with_context(
                || format!("Could not read a quest out of {} and {}", bin_file, dat_file),
            )?
        }
        _ => {
            return Err(anyhow!(
                "Expected either a single .qst input file or a .bin and .dat input pair"
            ))
        }
    };

    if summary.was_anything_repaired() {
        println!("Some problems were found with this quest and repaired along the way.");
    }
    summary
        .ensure_repaired()
        .context("The quest failed validation in a way that could not be repaired")?;

    Ok(quest)
}

pub fn quest_convert(args: &[String]) -> Result<()> {
    let (input_files, format, output_files) = collect_args(args)?;

    println!("Converting quest into {}", format.description());
    check_output_count(format, output_files)?;

    let mut quest = load_quest(input_files)?;

    // the client only finds a quest on its memory card when the download flag is set, and an
    // online quest must not carry the flag at all
    quest.set_is_download(format == ConvertFormat::OfflineQst);

    match format {
        ConvertFormat::RawBinDat | ConvertFormat::PrsBinDat => {
            let bin_path = Path::new(&output_files[0]);
            let dat_path = Path::new(&output_files[1]);
            println!("Writing {} and {}", &output_files[0], &output_files[1]);
            if format == ConvertFormat::RawBinDat {
                quest
                    .to_uncompressed_bindat_files(bin_path, dat_path)
                    .context("Could not write the decompressed .bin/.dat pair")?;
            } else {
                quest
                    .to_compressed_bindat_files(bin_path, dat_path)
                    .context("Could not write the compressed .bin/.dat pair")?;
            }
        }
        ConvertFormat::OnlineQst | ConvertFormat::OfflineQst => {
            println!("Writing {}", &output_files[0]);
            quest
                .to_qst_file(Path::new(&output_files[0]))
                .context("Could not write the .qst file")?;
        }
    }

    Ok(())
}
