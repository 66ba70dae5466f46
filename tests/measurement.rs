use crossbeam_channel::unbounded;
use lsc_pcie::notify::{ChannelObserver, MeasurementEvent};
use lsc_pcie::platform::Platform;
use lsc_pcie::sim::{sim_pixel_value, sim_scan, SimBoard};
use lsc_pcie::{
    Board, BoardError, BoardResult, CameraSettings, Driver, DriverStatus, MeasurementSettings,
    ScanPosition,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct TestPlatform {
    free: u64,
}

impl Platform for TestPlatform {
    fn free_and_total_physical_memory(&self) -> BoardResult<(u64, u64)> {
        Ok((self.free, self.free * 2))
    }

    fn raise_priority(&self) -> BoardResult<()> {
        Ok(())
    }

    fn restore_priority(&self) -> BoardResult<()> {
        Ok(())
    }
}

fn camera(pixel: u32, camcnt: u32, dma_buffer_size_in_scans: u32, polling: bool) -> CameraSettings {
    CameraSettings {
        pixel,
        camcnt,
        dma_buffer_size_in_scans,
        use_software_polling: polling,
        ..CameraSettings::default()
    }
}

fn settings(board_sel: u32, nos: u32, nob: u32) -> MeasurementSettings {
    MeasurementSettings {
        board_sel,
        nos,
        nob,
        continuous: false,
        cont_pause_in_microseconds: 0,
        poll_interval_us: 0,
    }
}

fn rig_with_memory(cameras: &[CameraSettings], free: u64) -> (Driver, Vec<Arc<SimBoard>>) {
    let mut boards = Vec::new();
    let mut sims = Vec::new();
    for (drvno, camera) in cameras.iter().enumerate() {
        let sim = SimBoard::new(camera.dma_buffer_size_in_scans as usize * camera.pixel as usize);
        boards.push(Board::new(drvno, sim.clone(), sim.clone()));
        sims.push(sim);
    }
    let driver = Driver::new(boards, Arc::new(TestPlatform { free })).unwrap();
    (driver, sims)
}

fn rig(cameras: &[CameraSettings]) -> (Driver, Vec<Arc<SimBoard>>) {
    rig_with_memory(cameras, 1 << 30)
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

fn assert_all_scans(driver: &Driver, drvno: usize, pixel: u32, camcnt: u32, nos: u32, nob: u32) {
    let mut frame = vec![0u16; pixel as usize];
    for block in 0..nob {
        for sample in 0..nos {
            for cam in 0..camcnt {
                driver
                    .get_frame(drvno, sample, block, cam, &mut frame)
                    .unwrap();
                assert_eq!(
                    frame,
                    sim_scan(pixel as usize, block + 1, sample + 1, cam),
                    "sample {sample}, block {block}, camera {cam}"
                );
            }
        }
    }
}

#[test]
fn polling_run_fills_the_user_buffer_in_order() {
    // 60 scans through a ring of 8 scans
    let cameras = [camera(64, 2, 8, true)];
    let (driver, _sims) = rig(&cameras);
    driver.init_measurement(&settings(1, 10, 3), &cameras).unwrap();
    driver.start_measurement().unwrap();

    let board = driver.board(0).unwrap();
    assert_eq!(board.scan_total(), 60);
    assert!(board.all_interrupts_done());
    assert!(!driver.is_running());
    assert_all_scans(&driver, 0, 64, 2, 10, 3);

    assert_eq!(
        driver.get_current_scan_number(0).unwrap(),
        Some(ScanPosition {
            sample: 9,
            block: 2,
            camera: 1
        })
    );
    assert_eq!(
        driver.get_scan_number(0, -2).unwrap(),
        Some(ScanPosition {
            sample: 8,
            block: 2,
            camera: 1
        })
    );
    assert_eq!(driver.get_scan_number(0, -60).unwrap(), None);
}

#[test]
fn interrupt_run_copies_parts_and_the_remainder() {
    // 5 scans per block set with parts of 2: two interrupts and one leftover
    let cameras = [camera(64, 1, 4, false)];
    let (driver, _sims) = rig(&cameras);
    driver.init_measurement(&settings(1, 5, 1), &cameras).unwrap();
    driver.start_measurement().unwrap();

    let board = driver.board(0).unwrap();
    assert_eq!(board.interrupt_count(), 2);
    assert_eq!(board.scan_total(), 5);
    assert_all_scans(&driver, 0, 64, 1, 5, 1);
}

#[test]
fn interrupt_run_spans_blocks() {
    let cameras = [camera(64, 1, 4, false)];
    let (driver, _sims) = rig(&cameras);
    driver.init_measurement(&settings(1, 4, 3), &cameras).unwrap();
    driver.start_measurement().unwrap();

    let board = driver.board(0).unwrap();
    assert_eq!(board.interrupt_count(), 6);
    assert_eq!(board.scan_total(), 12);
    assert_all_scans(&driver, 0, 64, 1, 4, 3);
}

#[test]
fn two_boards_run_in_lockstep() {
    let cameras = [camera(64, 1, 6, true), camera(128, 1, 8, false)];
    let (driver, sims) = rig(&cameras);
    driver.init_measurement(&settings(0b11, 4, 2), &cameras).unwrap();
    driver.start_measurement().unwrap();

    assert_all_scans(&driver, 0, 64, 1, 4, 2);
    assert_all_scans(&driver, 1, 128, 1, 4, 2);
    assert_eq!(sims[0].block_counter(), 2);
    assert_eq!(sims[1].block_counter(), 2);
}

#[test]
fn special_pixels_of_acquired_scans() {
    let cameras = [camera(64, 1, 8, true)];
    let (driver, _sims) = rig(&cameras);
    driver.init_measurement(&settings(1, 3, 2), &cameras).unwrap();
    driver.start_measurement().unwrap();

    assert_eq!(driver.get_block_index(0, 2, 1, 0).unwrap(), 2);
    assert_eq!(driver.get_scan_index(0, 2, 1, 0).unwrap(), 3);
    assert!(driver.get_camera_status_temp_good(0, 0, 0, 0).unwrap());
    assert!(!driver.get_camera_status_over_temp(0, 0, 0, 0).unwrap());
    assert!(!driver.get_s1_state(0, 0, 0, 0).unwrap());
    assert!(!driver.get_s2_state(0, 0, 0, 0).unwrap());

    let sp = driver.get_all_special_pixel_information(0, 1, 0, 0).unwrap();
    assert_eq!(sp.block_index, 1);
    assert_eq!(sp.scan_index, 2);
    assert_eq!(sp.scan_index_2, 2);
    assert_eq!(sp.fpga_ver_major, 2);
    assert_eq!(sp.fpga_ver_minor, 1);
    assert_eq!(
        driver.get_impact_signal_1(0, 1, 0, 0).unwrap(),
        (sim_pixel_value(1, 2, 0, 6) as u32) << 16 | sim_pixel_value(1, 2, 0, 7) as u32
    );

    assert!(matches!(
        driver.get_block_index(0, 3, 0, 0),
        Err(BoardError::OutOfRange { name: "sample", .. })
    ));
}

#[test]
fn short_scans_have_no_complete_special_pixel_set() {
    let cameras = [camera(32, 1, 4, true)];
    let (driver, _sims) = rig(&cameras);
    driver.init_measurement(&settings(1, 2, 1), &cameras).unwrap();
    driver.start_measurement().unwrap();
    assert!(matches!(
        driver.get_all_special_pixel_information(0, 0, 0, 0),
        Err(BoardError::InvalidPixelCount(32))
    ));
    assert_eq!(driver.get_scan_index(0, 1, 0, 0).unwrap(), 2);
}

#[test]
fn observer_sees_the_measurement_sequence() {
    let cameras = [camera(64, 1, 4, true)];
    let (tx, rx) = unbounded();
    let (driver, _sims) = rig(&cameras);
    let driver = driver.with_observer(Arc::new(ChannelObserver::new(tx)));
    driver.init_measurement(&settings(1, 2, 2), &cameras).unwrap();
    driver.start_measurement().unwrap();

    let events: Vec<_> = rx.try_iter().collect();
    assert!(matches!(events[0], MeasurementEvent::Start(_)));
    assert_eq!(
        &events[1..],
        &[
            MeasurementEvent::BlockStart(0),
            MeasurementEvent::BlockDone(0),
            MeasurementEvent::BlockStart(1),
            MeasurementEvent::BlockDone(1),
            MeasurementEvent::AllBlocksDone(1),
            MeasurementEvent::Done,
        ]
    );
}

#[test]
fn second_start_is_rejected_and_abort_resets_the_board() {
    let cameras = [camera(64, 1, 4, true)];
    let (driver, sims) = rig(&cameras);
    let driver = Arc::new(driver);
    let sim = &sims[0];
    driver.init_measurement(&settings(1, 4, 1), &cameras).unwrap();
    sim.set_block_trigger(false);

    let runner = {
        let driver = Arc::clone(&driver);
        thread::spawn(move || driver.start_measurement())
    };
    // The block counter advances right before the trigger wait, which only
    // reads registers.
    wait_until("trigger wait", || driver.is_running() && sim.block_counter() == 1);
    thread::sleep(Duration::from_millis(50));

    let writes = sim.write_count();
    assert!(matches!(driver.start_measurement(), Err(BoardError::AlreadyRunning)));
    assert!(matches!(
        driver.init_measurement(&settings(1, 4, 1), &cameras),
        Err(BoardError::AlreadyRunning)
    ));
    assert_eq!(sim.write_count(), writes);

    driver.abort_handle().abort();
    let result = runner.join().unwrap();
    assert!(matches!(result, Err(BoardError::Aborted)));
    assert!(!driver.is_running());

    let hw = driver.board(0).unwrap().hardware();
    assert!(!hw.is_timer_on().unwrap());
    assert!(!hw.is_block_on().unwrap());
    assert!(!hw.is_measure_on().unwrap());
    assert_eq!(sim.dma_reset_count(), 1);
    driver.wait_for_measure_ready().unwrap();
}

#[test]
fn abort_during_acquisition() {
    let cameras = [camera(64, 1, 4, true)];
    let (driver, sims) = rig(&cameras);
    let driver = Arc::new(driver);
    sims[0].set_scan_period(Duration::from_millis(2));
    driver.init_measurement(&settings(1, 1000, 5), &cameras).unwrap();

    let runner = {
        let driver = Arc::clone(&driver);
        thread::spawn(move || driver.start_measurement())
    };
    wait_until("first scans", || driver.board(0).unwrap().scan_total() >= 3);
    driver.abort_handle().abort();
    assert!(matches!(runner.join().unwrap(), Err(BoardError::Aborted)));

    let board = driver.board(0).unwrap();
    assert!(board.scan_total() < 5000);
    assert!(!board.hardware().is_timer_on().unwrap());
    assert_eq!(sims[0].dma_reset_count(), 1);
}

#[test]
fn abort_while_idle_resets_selected_boards() {
    let cameras = [camera(64, 1, 4, true)];
    let (driver, sims) = rig(&cameras);
    driver.init_measurement(&settings(1, 2, 1), &cameras).unwrap();
    driver.abort_measurement().unwrap();
    assert_eq!(sims[0].dma_reset_count(), 1);

    // a fresh start clears the abort request
    driver.start_measurement().unwrap();
    assert_eq!(driver.board(0).unwrap().scan_total(), 2);
}

#[test]
fn register_failure_short_circuits_the_fan_out() {
    let cameras = [camera(64, 1, 4, true), camera(64, 1, 4, true)];
    let (driver, sims) = rig(&cameras);
    driver.init_measurement(&settings(0b11, 2, 1), &cameras).unwrap();

    sims[0].set_fail_writes(true);
    let untouched = sims[1].write_count();
    let result = driver.start_measurement();
    assert!(matches!(
        result,
        Err(BoardError::Register(DriverStatus::WriteFailed))
    ));
    assert_eq!(sims[1].write_count(), untouched);
    assert!(!driver.is_running());

    sims[0].set_fail_writes(false);
    driver.start_measurement().unwrap();
    assert_eq!(driver.board(1).unwrap().scan_total(), 2);
}

#[test]
fn lost_camera_aborts_with_camera_not_found() {
    let cameras = [camera(64, 1, 4, true)];
    let (driver, sims) = rig(&cameras);
    driver.init_measurement(&settings(1, 2, 1), &cameras).unwrap();
    sims[0].set_camera_lost(true);

    assert!(matches!(
        driver.start_measurement(),
        Err(BoardError::CameraNotFound(0))
    ));
    let hw = driver.board(0).unwrap().hardware();
    assert!(!hw.is_measure_on().unwrap());
    assert_eq!(sims[0].dma_reset_count(), 1);
}

#[test]
fn camcnt_zero_skips_the_camera_check() {
    let cameras = [camera(64, 0, 4, true)];
    let (driver, sims) = rig(&cameras);
    driver.init_measurement(&settings(1, 2, 1), &cameras).unwrap();
    sims[0].set_camera_lost(true);
    driver.start_measurement().unwrap();
    assert_eq!(driver.board(0).unwrap().geometry().unwrap().camcnt, 1);
    assert_all_scans(&driver, 0, 64, 1, 2, 1);
}

#[test]
fn continuous_mode_repeats_until_stopped() {
    let cameras = [camera(64, 1, 4, true)];
    let (driver, _sims) = rig(&cameras);
    let driver = Arc::new(driver);
    let mut conf = settings(1, 2, 1);
    conf.continuous = true;
    conf.cont_pause_in_microseconds = 1000;
    driver.init_measurement(&conf, &cameras).unwrap();

    let runner = {
        let driver = Arc::clone(&driver);
        thread::spawn(move || driver.start_measurement())
    };
    wait_until("three block sets", || driver.measurement_count() >= 3);
    driver.abort_handle().stop_continuous();
    runner.join().unwrap().unwrap();

    assert!(driver.measurement_count() >= 3);
    assert_eq!(driver.board(0).unwrap().scan_total(), 2);
    assert_all_scans(&driver, 0, 64, 1, 2, 1);
}

#[test]
fn not_enough_ram_leaves_no_buffer() {
    let cameras = [camera(64, 1, 4, true)];
    let (driver, _sims) = rig_with_memory(&cameras, 1000);
    let result = driver.init_measurement(&settings(1, 10, 1), &cameras);
    assert!(matches!(
        result,
        Err(BoardError::NotEnoughRam {
            needed: 1280,
            available: 1000
        })
    ));
    assert!(driver.board(0).unwrap().user_buffer().is_none());
    assert!(!driver.is_running());
}

#[test]
fn invalid_settings_are_rejected() {
    let cameras = [camera(64, 1, 4, true)];
    let (driver, _sims) = rig(&cameras);
    assert!(matches!(
        driver.init_measurement(&settings(1, 1, 1), &cameras),
        Err(BoardError::InvalidSettings(_))
    ));
    assert!(matches!(
        driver.init_measurement(&settings(0, 2, 1), &cameras),
        Err(BoardError::NoBoardSelected)
    ));
    assert!(matches!(
        driver.init_measurement(&settings(0b10, 2, 1), &cameras),
        Err(BoardError::InvalidBoard(1))
    ));
    assert!(matches!(
        driver.start_measurement(),
        Err(BoardError::InvalidSettings(_))
    ));
}

#[test]
fn reallocation_gives_a_zeroed_buffer() {
    let cameras = [camera(64, 1, 4, true)];
    let (driver, _sims) = rig(&cameras);
    driver.init_measurement(&settings(1, 2, 1), &cameras).unwrap();
    driver.start_measurement().unwrap();
    assert_eq!(driver.calc_ram_usage_in_mb(), 256.0 / 1_048_576.0);

    driver.allocate_user_memory(0).unwrap();
    let board = driver.board(0).unwrap();
    let guard = board.user_buffer();
    let buffer = guard.as_ref().unwrap();
    assert_eq!(buffer.len(), 128);
    assert!(buffer.as_slice().iter().all(|&w| w == 0));
}

#[test]
fn block_view_and_noise() {
    let cameras = [camera(64, 1, 8, true)];
    let (driver, _sims) = rig(&cameras);
    driver.init_measurement(&settings(1, 4, 1), &cameras).unwrap();
    driver.start_measurement().unwrap();

    let block = driver.get_one_block_of_one_camera(0, 0, 0).unwrap();
    assert_eq!(block.dim(), (4, 64));
    assert_eq!(block.row(2).to_vec(), sim_scan(64, 1, 3, 0));

    // pixel 20 holds 1000 + 10 * scan index + 20
    let (mean, trms) = driver.calc_trms(0, 0, 4, 20, 0).unwrap();
    assert!((mean - 1045.0).abs() < 1e-9);
    assert!((trms - 10.0).abs() < 1e-9);
    assert!(matches!(
        driver.calc_trms(0, 2, 2, 20, 0),
        Err(BoardError::OutOfRange { .. })
    ));
    assert!(matches!(
        driver.calc_trms(0, 0, 5, 20, 0),
        Err(BoardError::OutOfRange { .. })
    ));
}

#[test]
fn dummy_data_pattern() {
    let cameras = [camera(64, 1, 4, true)];
    let (driver, _sims) = rig(&cameras);
    driver.init_measurement(&settings(1, 2, 1), &cameras).unwrap();
    driver.fill_user_buffer_with_dummy_data(0).unwrap();

    let mut frame = vec![0u16; 64];
    driver.get_frame(0, 0, 0, 0, &mut frame).unwrap();
    assert_eq!(frame[3], 30);
    driver.get_frame(0, 1, 0, 0, &mut frame).unwrap();
    assert_eq!(frame[3], 1030);
}

#[test]
fn scans_without_the_leading_special_pixels_are_rejected() {
    for pixel in [4, 9] {
        let cameras = [camera(pixel, 1, 4, true)];
        let (driver, _sims) = rig(&cameras);
        assert!(matches!(
            driver.init_measurement(&settings(1, 2, 1), &cameras),
            Err(BoardError::InvalidPixelCount(p)) if p == pixel
        ));
        assert!(driver.board(0).unwrap().user_buffer().is_none());
    }
}

#[test]
fn odd_dma_ring_is_rejected() {
    for polling in [false, true] {
        let cameras = [camera(64, 1, 5, polling)];
        let (driver, _sims) = rig(&cameras);
        assert!(matches!(
            driver.init_measurement(&settings(1, 6, 1), &cameras),
            Err(BoardError::InvalidSettings(_))
        ));
    }

    // an even ring wraps cleanly, the remainder lands in the first part
    let cameras = [camera(64, 1, 6, false)];
    let (driver, _sims) = rig(&cameras);
    driver.init_measurement(&settings(1, 8, 1), &cameras).unwrap();
    driver.start_measurement().unwrap();
    assert_eq!(driver.board(0).unwrap().interrupt_count(), 2);
    assert_all_scans(&driver, 0, 64, 1, 8, 1);
}

#[test]
fn init_programs_trigger_and_delay_registers() {
    use lsc_pcie::registers::*;

    let cameras = [CameraSettings {
        sslope: 2,
        bslope: 0,
        sdat_in_10ns: 50,
        bdat_in_10ns: 60,
        bec_in_10ns: 0,
        xckdelay_in_10ns: 7,
        ticnt: 2,
        tocnt: 0,
        ..camera(64, 1, 4, true)
    }];
    let (driver, sims) = rig(&cameras);
    let sim = &sims[0];
    sim.write_u32(AddressSpace::S0, S0_SEC, 99).unwrap();
    sim.write_u32(AddressSpace::S0, S0_BEC, 99).unwrap();
    driver.init_measurement(&settings(1, 2, 1), &cameras).unwrap();

    let read = |address| sim.read_u32(AddressSpace::S0, address).unwrap();
    assert_eq!(read(S0_SEC), 0);
    assert_eq!(read(S0_BEC), 0);
    assert_eq!(read(S0_SDAT), 50 | DELAY_BIT_ENABLE);
    assert_eq!(read(S0_BDAT), 60 | DELAY_BIT_ENABLE);
    assert_eq!(read(S0_XCKDLY), 7 | DELAY_BIT_ENABLE);
    assert_eq!(read(S0_BSLOPE), 0);
    let both = (1 << CTRLA_BITINDEX_SLOPE) | (1 << CTRLA_BITINDEX_BOTH_SLOPE);
    assert_eq!(sim.read_u8(AddressSpace::S0, S0_CTRLA).unwrap() & both, both);
    assert_eq!(
        sim.read_u8(AddressSpace::S0, S0_TOR_TICNT).unwrap(),
        2 | TOR_BIT_ENABLE
    );
    assert_eq!(sim.read_u8(AddressSpace::S0, S0_TOR_TOCNT).unwrap(), 0);

    let bad = [CameraSettings {
        sslope: 3,
        ..camera(64, 1, 4, true)
    }];
    assert!(matches!(
        driver.init_measurement(&settings(1, 2, 1), &bad),
        Err(BoardError::OutOfRange { name: "sslope", .. })
    ));
}

#[test]
fn abort_at_the_block_trigger_resets_every_selected_board() {
    let cameras = [camera(64, 1, 4, true), camera(64, 1, 4, false)];
    let (driver, sims) = rig(&cameras);
    let driver = Arc::new(driver);
    driver.init_measurement(&settings(0b11, 4, 1), &cameras).unwrap();
    sims[0].set_block_trigger(false);

    let runner = {
        let driver = Arc::clone(&driver);
        thread::spawn(move || driver.start_measurement())
    };
    wait_until("trigger wait", || {
        driver.is_running() && sims.iter().all(|sim| sim.block_counter() == 1)
    });

    // nothing has been copied yet
    let mut frame = vec![0u16; 64];
    for drvno in 0..2 {
        assert!(matches!(
            driver.get_frame(drvno, 0, 0, 0, &mut frame),
            Err(BoardError::NotYetAcquired { drvno: d, .. }) if d == drvno
        ));
    }
    assert!(matches!(
        driver.get_scan_index(1, 0, 0, 0),
        Err(BoardError::NotYetAcquired { .. })
    ));
    assert!(matches!(
        driver.get_frame(0, 4, 0, 0, &mut frame),
        Err(BoardError::OutOfRange { name: "sample", .. })
    ));

    driver.abort_handle().abort();
    assert!(matches!(runner.join().unwrap(), Err(BoardError::Aborted)));
    for (drvno, sim) in sims.iter().enumerate() {
        let hw = driver.board(drvno).unwrap().hardware();
        assert!(!hw.is_measure_on().unwrap(), "board {drvno}");
        assert!(!hw.is_block_on().unwrap(), "board {drvno}");
        assert!(!hw.is_timer_on().unwrap(), "board {drvno}");
        assert_eq!(sim.dma_reset_count(), 1, "board {drvno}");
    }

    // once stopped the buffer is readable again
    driver.get_frame(0, 0, 0, 0, &mut frame).unwrap();
}

#[test]
fn scan_number_offsets_do_not_overflow() {
    let cameras = [camera(64, 1, 4, true)];
    let (driver, _sims) = rig(&cameras);
    driver.init_measurement(&settings(1, 2, 1), &cameras).unwrap();
    assert!(matches!(
        driver.get_scan_number(0, i64::MIN),
        Err(BoardError::OutOfRange { name: "offset", .. })
    ));

    driver.start_measurement().unwrap();
    assert!(matches!(
        driver.get_scan_number(0, i64::MAX),
        Err(BoardError::OutOfRange { name: "offset", .. })
    ));
    assert_eq!(driver.get_scan_number(0, i64::MIN).unwrap(), None);
    assert_eq!(
        driver.get_scan_number(0, -1).unwrap(),
        Some(ScanPosition {
            sample: 0,
            block: 0,
            camera: 0
        })
    );
}
