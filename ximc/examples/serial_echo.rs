//! Serial controller example
//!
//! Sends `zero` and prints the calibrated position when a correction table
//! is given:
//!
//! ```text
//! XIMC_URI=xi-com:///dev/ttyACM0 XIMC_TABLE=table.txt cargo run --example serial_echo
//! ```

use std::path::PathBuf;

use ximc::Ximc;

#[tokio::main]
async fn main() -> ximc::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let uri = std::env::var("XIMC_URI").unwrap_or_else(|_| "xi-com:///dev/ttyACM0".to_string());

    let ximc = Ximc::from_env();
    let id = ximc.open(&uri).await?;
    println!("Device {} connected!", id);

    ximc.command_checked_echo_str(id, "zero").await?;
    println!("Position zeroed");

    if let Ok(table) = std::env::var("XIMC_TABLE") {
        ximc.set_correction_table(id, Some(&PathBuf::from(table))).await?;
        if let Some(user) = ximc.correct_to_user(id, 0.0).await? {
            println!("Corrected zero: {}", user);
        }
    }

    ximc.close_device(id).await?;

    Ok(())
}
