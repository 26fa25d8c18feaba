//! Interactive action loop: list, pair, unpair, exit

use std::io::{self, BufRead, Write};

use anyhow::Result;

use sensebridge_gateway::Gateway;
use sensebridge_transport::protocol::timing::SCAN_TIMEOUT;

pub fn run(gateway: &Gateway) -> Result<()> {
    let stdin = io::stdin();
    loop {
        println!("L to list");
        println!("P to pair");
        println!("U <mac>... to unpair");
        println!("X to exit");
        print!("Action: ");
        io::stdout().flush()?;

        let Some(line) = stdin.lock().lines().next() else {
            break;
        };
        let line = line?;
        let mut words = line.split_whitespace();
        let Some(action) = words.next() else {
            continue;
        };

        match action.to_ascii_uppercase().as_str() {
            "L" => list(gateway),
            "P" => pair(gateway),
            "U" => unpair(gateway, words),
            "X" => break,
            other => println!("Unknown action: {other}"),
        }
    }
    Ok(())
}

fn list(gateway: &Gateway) {
    match gateway.list() {
        Ok(sensors) => {
            println!("{} sensors paired:", sensors.len());
            for mac in sensors {
                println!("\tSensor: {mac}");
            }
        }
        Err(e) => println!("Listing sensors failed: {e}"),
    }
}

fn pair(gateway: &Gateway) {
    println!("Scanning for a new sensor, press its reset now...");
    match gateway.scan(SCAN_TIMEOUT) {
        Ok(Some(sensor)) => println!(
            "Sensor found: mac={}, type={}, version={}",
            sensor.mac, sensor.kind_code, sensor.version
        ),
        Ok(None) => println!("No sensor found!"),
        Err(e) => println!("Pairing failed: {e}"),
    }
}

fn unpair<'a>(gateway: &Gateway, macs: impl Iterator<Item = &'a str>) {
    let mut any = false;
    for mac in macs {
        any = true;
        if mac.len() != 8 {
            println!("Invalid mac address, must be 8 characters: {mac}");
            continue;
        }
        println!("Un-pairing sensor {mac}:");
        match gateway.delete(mac) {
            Ok(true) => println!("Sensor {mac} removed"),
            Ok(false) => println!("Failed to remove sensor {mac}"),
            Err(e) => println!("Failed to remove sensor {mac}: {e}"),
        }
    }
    if !any {
        println!("Usage: U <mac>...");
    }
}
