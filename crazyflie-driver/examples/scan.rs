use anyhow::Result;
use crazyflie_driver::{LinkOptions, RadioDriver};

fn main() -> Result<()> {
    let driver = RadioDriver::native(LinkOptions::default());

    for dongle in driver.dongles()? {
        println!("Using {}", dongle);
    }

    let found = driver.scan_interface()?;

    println!("Found {} Crazyflies.", found.len());
    for uri in found {
        println!(" - {}", uri)
    }

    Ok(())
}
