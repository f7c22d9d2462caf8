//! In this example, we lease the droplet sorter of a simulated Red Pitaya, configure its sorting
//! windows, and print every droplet it reports while a fake gateware feeds the status record.

use rpfpga::{
    blocks::fads::{
        self,
        INTENSITY_LSB,
    },
    prelude::*,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let rp = RedPitaya::new(Mock::default(), &Layout::default())?;

    // Print the register map, as a GUI would consume it
    let schema = rp.fads.acquire("inspector")?.schema().clone();
    println!("{}", serde_json::to_string_pretty(&schema.parameters())?);

    let sorter = rp.fads.acquire("demo")?;
    sorter.set_intensity_window(0.05, 0.8)?;
    sorter.set_width_window(1_250, 62_500)?;
    sorter.set("min_peaks", 1u32)?;
    sorter.set("sort_delay", 2_500u32)?;
    sorter.set("sort_duration", 12_500u32)?;
    sorter.start()?;

    // Someone else asking for the only sorter is turned away
    if let Err(e) = rp.fads.acquire("intruder") {
        println!("{e}");
    }

    let mut monitor = sorter.monitor();
    for id in 1..=5u32 {
        // Two polls per droplet, the second one sees nothing new
        {
            let mut transport = rp.transport().lock().unwrap();
            let base = fads::BASE + 0x200;
            transport.poke(base, id);
            transport.poke(base + 4, ((0.1 * f64::from(id)) / INTENSITY_LSB) as u32);
            transport.poke(base + 8, 5_000 * id);
            transport.poke(base + 12, id % 2);
            transport.poke(base + 16, 125_000 * id);
        }
        for _ in 0..2 {
            if let Some(droplet) = monitor.poll()? {
                println!(
                    "droplet {}: {:.3} V, {:.3} ms, class {}",
                    droplet.id, droplet.intensity, droplet.width_ms, droplet.classification
                );
            }
        }
    }

    println!("{}", serde_json::to_string(&sorter.setup()?)?);
    sorter.release()?;
    println!("running after release: {}", rp.fads.acquire("check")?.is_running()?);
    Ok(())
}
