//! Virtual controller round trip
//!
//! Stores a position in a file-backed controller and reads it back.

use ximc::{CommandName, FrameReader, FrameWriter, Ximc};

#[tokio::main]
async fn main() -> ximc::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let path = std::env::temp_dir().join("ximc_virtual_controller.bin");
    let uri = format!("xi-emu:///{}?serial=56", path.display().to_string().trim_start_matches('/'));

    let ximc = Ximc::from_env();
    let id = ximc.open(&uri).await?;
    println!("✓ Opened {}", uri);

    let mut frame = FrameWriter::with_command(CommandName::new(*b"spos"), 4 + 4 + 2 + 2);
    frame.push_i32(12_800)?;
    frame.push_i16(0)?;
    frame.push_crc()?;
    ximc.command_checked_echo(id, &frame.finish()?).await?;
    println!("✓ Position stored");

    let mut response = [0u8; 4 + 4 + 2 + 2];
    ximc.command_checked_str(id, "gpos", &mut response).await?;

    let mut reader = FrameReader::new(&response);
    reader.pop_command()?;
    let position = reader.pop_i32()?;
    let microsteps = reader.pop_i16()?;
    let consumed = reader.position();
    ximc.check_in_overrun(id, &response, consumed).await?;
    println!("✓ Position: {} ({} microsteps)", position, microsteps);

    ximc.close_device(id).await?;
    println!("✓ Closed");

    Ok(())
}
