// Read and write a parameter, then log the attitude for a few seconds
use crazyflie_driver::log::{LogConfig, LogVariable};
use crazyflie_driver::{Crazyflie, CrazyflieOptions, LogType};
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "params_and_logging")]
struct Opt {
    /// Folder caching the TOCs between runs
    #[structopt(short, long, parse(from_os_str))]
    cache: Option<PathBuf>,

    /// Logging period in units of 10ms
    #[structopt(short, default_value = "10")]
    period: u8,

    #[structopt(name = "URI")]
    link_uri: String,
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    let cf = Crazyflie::new(CrazyflieOptions {
        cache_folder: opt.cache,
        ..CrazyflieOptions::default()
    });

    cf.callbacks()
        .disconnected
        .register("example", |uri: &str| println!("Disconnected from {}", uri));

    cf.open_link(&opt.link_uri)?;
    println!(
        "Connected, {} log variables and {} parameters",
        cf.log().toc().len(),
        cf.param().toc().len()
    );

    if let Some(value) = cf.param().get_value("pid_attitude.roll_kp") {
        println!("pid_attitude.roll_kp = {}", value);
        cf.param().set_value("pid_attitude.roll_kp", value);
    }

    let config = LogConfig::new(vec![
        LogVariable::toc("stabilizer.roll", LogType::Float),
        LogVariable::toc("stabilizer.pitch", LogType::Float),
        LogVariable::toc("stabilizer.yaw", LogType::Float),
    ])
    .with_period(opt.period);

    let block = cf.log().create_log_block(&config)?;
    cf.log().start_logging(block, |sample| {
        let mut names: Vec<_> = sample.keys().collect();
        names.sort();
        for name in names {
            print!("{}: {}  ", name, sample[name]);
        }
        println!();
    });

    std::thread::sleep(Duration::from_secs(5));

    cf.log().stop_logging(block);
    cf.log().delete_block(block);
    cf.close_link();

    Ok(())
}
