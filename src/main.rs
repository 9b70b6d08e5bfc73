use clap::Parser;
use clipcam::capture::list_cameras;
use clipcam::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    if config.list_cameras {
        let cameras = list_cameras();
        if cameras.is_empty() {
            println!("No cameras found");
        }
        for camera in cameras {
            println!("{}\t{}", camera.id, camera.name);
        }
        return Ok(());
    }

    clipcam::init_tracing();
    clipcam::run(config).await
}
