//! Integration tests for the P-Star CDC-ACM descriptors.
//!
//! Run with the device attached to check what it reports during enumeration
//! against the descriptor table.

#[allow(dead_code)]
mod device;

use clap::Parser;
use colored::Colorize;

use pstar_usb_descriptors::config::usb_identity;

use device::{parse_hex_id, UsbDevice};
use tests::{print_results, run_all_tests};

#[derive(Parser)]
#[command(name = "descriptor-tests")]
#[command(about = "Check the attached device's USB descriptors against the table")]
struct Args {
    /// Vendor ID in hex (default: Pololu 1ffb)
    #[arg(long, value_parser = parse_hex_id)]
    vid: Option<u16>,

    /// Product ID in hex (default: P-Star 2400)
    #[arg(long, value_parser = parse_hex_id)]
    pid: Option<u16>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let vid = args.vid.unwrap_or(usb_identity::VENDOR_ID);
    let pid = args.pid.unwrap_or(usb_identity::PRODUCT_ID);

    println!("{}", "P-Star Descriptor Tests".bold());
    println!("Device: {:04x}:{:04x}", vid, pid);
    println!();

    println!("Opening device...");
    let mut device = UsbDevice::open(vid, pid)?;
    println!("{}", "Opened!".green());

    println!("\nRunning tests...\n");

    let results = run_all_tests(&mut device);
    print_results(&results);

    // Exit with error code if any tests failed
    let failed = results.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}
