use std::error::Error;

use sys_exporter::config::ServerSection;
use sys_exporter::sample::Snapshot;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let address = std::env::args().nth(1).unwrap_or_else(|| ServerSection::default().address);
    let stream = TcpStream::connect(&address).await?;

    println!("Streaming snapshots from {address}");
    println!("==================================");

    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        let snapshot: Snapshot = serde_json::from_str(&line)?;

        println!("\nSnapshot of {} samples:", snapshot.samples);
        if let Some(load) = snapshot.metrics.load_average {
            println!("Load Average: {:.2} {:.2} {:.2}", load.one, load.five, load.fifteen);
        }
        if let Some(cpu) = snapshot.metrics.cpu_usage {
            println!("CPU: {:.1}% busy, {:.1}% idle", cpu.busy_percent, cpu.idle_percent);
        }
        if let Some(disk) = &snapshot.metrics.disk_usage {
            println!("Disk: {:.2} MB/s, {:.1} transfers/s", disk.mb_per_second, disk.transfers_per_second);
        }
        if let Some(talkers) = &snapshot.metrics.network_talkers {
            for talker in &talkers.by_bytes_in {
                println!("Network {}: {} bytes in, {} bytes out", talker.name, talker.bytes_in, talker.bytes_out);
            }
        }
        if let Some(info) = &snapshot.metrics.filesystems {
            for fs in &info.filesystems {
                println!("{} ({}): {:.1}% used", fs.mount_point, fs.file_system, fs.used_percent());
            }
        }
    }

    println!("\nExporter closed the stream");
    Ok(())
}
