use anyhow::{bail, Context, Result};
use sds_acq::{decode_analog_samples, parse_descriptor_lengths, types::SIGLENT_HEADER_SIZE};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
    about = "Decodes a captured Siglent SDS waveform block (as written to disk verbatim off the wire) into physical sample values. Operates on a single block at a time; it does not talk to a device."
)]
struct Opt {
    #[structopt(name = "FILE", parse(from_os_str))]
    file: PathBuf,

    #[structopt(long, default_value = "1.0", help = "Vertical gain (volts/div) to apply")]
    vdiv: f64,

    #[structopt(long, default_value = "0.0", help = "Vertical offset (volts) to apply")]
    offset: f64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let opt = Opt::from_args();

    let mut buf = Vec::new();
    File::open(&opt.file)
        .with_context(|| format!("failed to open {:?}", opt.file))?
        .read_to_end(&mut buf)
        .with_context(|| format!("failed to read {:?}", opt.file))?;

    if buf.len() < SIGLENT_HEADER_SIZE {
        bail!(
            "file is {} bytes, shorter than the {}-byte block prefix",
            buf.len(),
            SIGLENT_HEADER_SIZE
        );
    }

    let desc = parse_descriptor_lengths(&buf).context("failed to parse block prefix")?;
    println!(
        "desc_length={} data_length={}",
        desc.desc_length, desc.data_length
    );

    let block_header_size = (desc.desc_length + 15) as usize;
    let data_start = block_header_size;
    let data_end = data_start + desc.data_length as usize;
    if buf.len() < data_end {
        bail!(
            "file has {} bytes of payload after the prefix, expected {}",
            buf.len().saturating_sub(data_start),
            desc.data_length
        );
    }

    let samples = decode_analog_samples(&buf[data_start..data_end], opt.vdiv, opt.offset);
    for (i, v) in samples.iter().enumerate() {
        println!("{i}\t{v}");
    }

    Ok(())
}
