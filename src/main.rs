use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use confique::Config as _;
use crossbeam_channel::unbounded;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal;
use log::{info, warn, LevelFilter};
use lsc_pcie::notify::{ChannelObserver, MeasurementEvent};
use lsc_pcie::platform::LinuxPlatform;
use lsc_pcie::sim::SimBoard;
use lsc_pcie::{
    calc_measure_time_in_seconds, AbortHandle, Board, BoardError, CameraSettings, Conf, Driver,
};
use simplelog::{ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger};
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "lsc_acquire")]
#[command(about = "Run a measurement on simulated LSC PCIe boards", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Repeat for debug and trace output
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Also write the log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(path) = &cli.log_file {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        loggers.push(WriteLogger::new(level, Config::default(), file));
    }
    CombinedLogger::init(loggers)?;
    Ok(())
}

/// `Esc`/`q` aborts, `Space` ends continuous mode. Runs until `done` is set.
fn watch_keys(abort: AbortHandle, done: Arc<AtomicBool>) -> Result<()> {
    terminal::enable_raw_mode()?;
    let result = (|| -> Result<()> {
        while !done.load(Ordering::SeqCst) {
            if !event::poll(Duration::from_millis(100))? {
                continue;
            }
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Esc | KeyCode::Char('q') => {
                        info!("Abort requested");
                        abort.abort();
                    }
                    KeyCode::Char(' ') => {
                        info!("Stopping continuous mode");
                        abort.stop_continuous();
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    })();
    terminal::disable_raw_mode()?;
    result
}

fn build_driver(conf: &Conf) -> Result<Driver> {
    let mut boards = Vec::with_capacity(conf.sim.boards);
    for drvno in 0..conf.sim.boards {
        let camera = conf.cameras.get(drvno).cloned().unwrap_or_default();
        let ring_words = camera.dma_buffer_size_in_scans as usize * camera.pixel as usize;
        let sim = SimBoard::new(ring_words);
        sim.set_scan_period(Duration::from_micros(conf.sim.scan_period_us));
        sim.set_noise(conf.sim.noise);
        boards.push(Board::new(drvno, sim.clone(), sim));
    }
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for event in rx {
            match event {
                MeasurementEvent::Start(at) => info!("Measurement started at {at}"),
                MeasurementEvent::AllBlocksDone(n) => info!("Block set {n} done"),
                MeasurementEvent::Done => info!("Measurement finished"),
                MeasurementEvent::DiskWriterStarted(drvno) => {
                    warn!("Board {drvno}: no disk writer attached")
                }
                _ => {}
            }
        }
    });
    Ok(Driver::new(boards, Arc::new(LinuxPlatform::new()))?
        .with_observer(Arc::new(ChannelObserver::new(tx))))
}

fn print_summary(driver: &Driver, conf: &Conf) -> Result<()> {
    println!("RAM usage: {:.2} MiB", driver.calc_ram_usage_in_mb());
    for drvno in conf.measurement.selected_boards() {
        let board = driver.board(drvno)?;
        println!("Board {drvno}: {} scans copied", board.scan_total());
        if let Some(geometry) = board.geometry() {
            let pixel = geometry.pixel / 2;
            let (mean, trms) = driver.calc_trms(drvno, 0, geometry.nos, pixel, 0)?;
            println!("  pixel {pixel} of block 0: mean {mean:.1}, rms noise {trms:.2}");
        }
        let Some(pos) = driver.get_current_scan_number(drvno)? else {
            continue;
        };
        println!(
            "  last scan: sample {}, block {}, camera {}",
            pos.sample, pos.block, pos.camera
        );
        match driver.get_all_special_pixel_information(drvno, pos.sample, pos.block, pos.camera) {
            Ok(sp) => println!("  {sp:?}"),
            Err(BoardError::InvalidPixelCount(pixel)) => {
                println!("  {pixel} pixel scans carry no complete special pixel set")
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let conf = Conf::builder()
        .env()
        .file(&cli.config)
        .load()
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let stime_ms = conf
        .cameras
        .first()
        .map(|c: &CameraSettings| c.stime_in_microsec as f64 / 1000.0)
        .unwrap_or_default();
    info!(
        "Expected measurement time {:.3} s",
        calc_measure_time_in_seconds(conf.measurement.nos, conf.measurement.nob, stime_ms)
    );

    let driver = build_driver(&conf)?;
    driver
        .init_measurement(&conf.measurement, &conf.cameras)
        .context("init measurement")?;

    let done = Arc::new(AtomicBool::new(false));
    let keys = {
        let abort = driver.abort_handle();
        let done = Arc::clone(&done);
        thread::spawn(move || watch_keys(abort, done))
    };

    let result = driver.start_measurement();
    done.store(true, Ordering::SeqCst);
    match keys.join() {
        Ok(Err(e)) => warn!("Key handling stopped: {e}"),
        Err(_) => warn!("Key thread panicked"),
        Ok(Ok(())) => {}
    }

    match result {
        Ok(()) => {}
        Err(e) if e.is_abortion() => println!("Measurement aborted"),
        Err(e) => return Err(e).context("measurement"),
    }
    print_summary(&driver, &conf)
}
