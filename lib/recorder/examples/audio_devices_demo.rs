use recorder::input_devices;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let devices = input_devices()?;

    println!("\nAvailable Audio Devices:");
    println!("------------------------");

    for (i, device) in devices.iter().enumerate() {
        println!(
            "{}. {} {:?} {:?}",
            i + 1,
            device.name,
            device.default_config,
            device.supported_formats
        );
    }

    Ok(())
}
