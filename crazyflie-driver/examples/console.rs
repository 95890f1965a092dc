use crazyflie_driver::{Crazyflie, CrazyflieOptions};
use std::io::Write;
use std::time::Duration;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "console")]
struct Opt {
    /// Seconds to print the console for
    #[structopt(short, default_value = "10")]
    duration: u64,

    #[structopt(name = "URI", default_value = "radio://0/60/2M/996028180455")]
    link_uri: String,
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    let cf = Crazyflie::new(CrazyflieOptions::default());
    cf.open_link(&opt.link_uri)?;

    cf.console().start_reading(|data| {
        print!("{}", String::from_utf8_lossy(data));
        let _ = std::io::stdout().flush();
    });

    std::thread::sleep(Duration::from_secs(opt.duration));

    cf.console().stop_reading();
    cf.close_link();

    Ok(())
}
