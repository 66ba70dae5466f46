use lsc_pcie::hardware::{BlockTrigger, BoardHardware};
use lsc_pcie::registers::*;
use lsc_pcie::sim::SimBoard;
use lsc_pcie::{BoardError, DmaBuffer, DriverStatus, RegisterAccess};
use std::sync::Arc;

fn board() -> (BoardHardware, Arc<SimBoard>) {
    let sim = SimBoard::new(256);
    (BoardHardware::new(0, sim.clone()), sim)
}

#[test]
fn dma_buffer_registers() {
    let (hw, sim) = board();
    hw.set_dma_buf_regs(1000, 10, 3).unwrap();
    assert_eq!(sim.read_u32(AddressSpace::S0, S0_DMA_BUF_SIZE_IN_SCANS).unwrap(), 1000);
    assert_eq!(sim.read_u32(AddressSpace::S0, S0_DMAS_PER_INTR).unwrap(), 500);
    assert_eq!(sim.read_u32(AddressSpace::S0, S0_NOS).unwrap(), 10);
    assert_eq!(sim.read_u32(AddressSpace::S0, S0_NOB).unwrap(), 3);
}

#[test]
fn pixel_count_must_fit_the_register() {
    let (hw, sim) = board();
    hw.set_pixel_count(2048).unwrap();
    assert_eq!(sim.read_u16(AddressSpace::S0, S0_PIXREG).unwrap(), 2048);
    assert!(matches!(
        hw.set_pixel_count(70_000),
        Err(BoardError::InvalidPixelCount(70_000))
    ));
}

#[test]
fn trigger_modes_share_ctrlb() {
    let (hw, sim) = board();
    hw.set_sti(5).unwrap();
    hw.set_bti(3).unwrap();
    assert_eq!(sim.read_u8(AddressSpace::S0, S0_CTRLB).unwrap(), 5 | 3 << 3);
    hw.set_sti(1).unwrap();
    assert_eq!(sim.read_u8(AddressSpace::S0, S0_CTRLB).unwrap(), 1 | 3 << 3);
}

#[test]
fn scan_timer_keeps_its_period() {
    let (hw, sim) = board();
    hw.set_stimer(1234).unwrap();
    assert!(!hw.is_timer_on().unwrap());
    hw.start_stimer().unwrap();
    assert!(hw.is_timer_on().unwrap());
    assert_eq!(
        sim.read_u32(AddressSpace::S0, S0_XCK).unwrap() & XCK_BITS_STIME,
        1234
    );
    hw.stop_stimer().unwrap();
    assert!(!hw.is_timer_on().unwrap());
}

#[test]
fn block_timer_zero_disables() {
    let (hw, sim) = board();
    hw.set_btimer(500).unwrap();
    assert_eq!(
        sim.read_u32(AddressSpace::S0, S0_BTIMER).unwrap(),
        500 | BTIMER_BIT_ENABLE
    );
    hw.set_btimer(0).unwrap();
    assert_eq!(sim.read_u32(AddressSpace::S0, S0_BTIMER).unwrap(), 0);
}

#[test]
fn hardware_counters() {
    let (hw, sim) = board();
    hw.count_blocks_by_hardware().unwrap();
    hw.count_blocks_by_hardware().unwrap();
    assert_eq!(sim.block_counter(), 2);
    assert_eq!(sim.read_u32(AddressSpace::S0, S0_BLOCKINDEX).unwrap(), 2);
    hw.reset_hardware_counter().unwrap();
    assert_eq!(sim.block_counter(), 0);
    assert_eq!(sim.read_u32(AddressSpace::S0, S0_SCANINDEX).unwrap(), 0);
}

#[test]
fn block_trigger_sources() {
    let (hw, sim) = board();
    assert!(hw.read_block_trigger_state(BlockTrigger::Always).unwrap());
    assert!(hw.read_block_trigger_state(BlockTrigger::TStart).unwrap());
    sim.set_block_trigger(false);
    assert!(!hw.read_block_trigger_state(BlockTrigger::TStart).unwrap());

    sim.write_u8(AddressSpace::S0, S0_CTRLC, CTRLC_BIT_S1).unwrap();
    assert!(hw.read_block_trigger_state(BlockTrigger::S1).unwrap());
    assert!(!hw.read_block_trigger_state(BlockTrigger::S2).unwrap());
    assert!(!hw.read_block_trigger_state(BlockTrigger::S1AndS2).unwrap());
    sim.write_u8(AddressSpace::S0, S0_CTRLC, CTRLC_BIT_S1 | CTRLC_BIT_S2)
        .unwrap();
    assert!(hw.read_block_trigger_state(BlockTrigger::S1AndS2).unwrap());

    assert!(!hw.read_block_trigger_state(BlockTrigger::Input).unwrap());
    sim.write_u8(AddressSpace::S0, S0_CTRLA, CTRLA_BIT_DIR_TRIGIN)
        .unwrap();
    assert!(hw.read_block_trigger_state(BlockTrigger::Input).unwrap());
    assert_eq!(BlockTrigger::from(4), BlockTrigger::S1AndS2);
    assert_eq!(BlockTrigger::from(9), BlockTrigger::Always);
}

#[test]
fn camera_presence() {
    let (hw, sim) = board();
    hw.find_cam(1).unwrap();
    sim.set_camera_lost(true);
    assert!(matches!(hw.find_cam(1), Err(BoardError::CameraNotFound(0))));
    hw.find_cam(0).unwrap();
}

#[test]
fn measure_and_block_flags() {
    let (hw, _sim) = board();
    hw.set_measure_on().unwrap();
    hw.set_block_on().unwrap();
    assert!(hw.is_measure_on().unwrap() && hw.is_block_on().unwrap());
    hw.reset_block_on().unwrap();
    assert!(hw.is_measure_on().unwrap() && !hw.is_block_on().unwrap());
    hw.reset_measure_on().unwrap();
    assert!(!hw.is_measure_on().unwrap());
    assert!(!hw.is_tdc().unwrap() && !hw.is_dsc().unwrap());
    assert!(!hw.check_fifo_flags().unwrap());
    assert!(!hw.check_fifo_overflow().unwrap());
}

#[test]
fn dma_reset_pulses_the_initiator_reset() {
    let (hw, sim) = board();
    hw.reset_dma().unwrap();
    assert_eq!(sim.dma_reset_count(), 1);
    assert_eq!(sim.read_u32(AddressSpace::Dma, DMA_DCSR).unwrap() & 1, 0);
}

#[test]
fn failed_writes_surface_as_driver_status() {
    let (hw, sim) = board();
    sim.set_fail_writes(true);
    assert_eq!(hw.set_measure_on(), Err(DriverStatus::WriteFailed));
    assert_eq!(sim.write_count(), 0);
}

#[test]
fn sim_ring_has_requested_size() {
    let (_hw, sim) = board();
    assert_eq!(DmaBuffer::len(sim.as_ref()), 256);
    assert_eq!(sim.size_in_bytes(), 512);
}

#[test]
fn scan_slope_bits_of_ctrla() {
    let (hw, sim) = board();
    let slope = 1 << CTRLA_BITINDEX_SLOPE;
    let both = 1 << CTRLA_BITINDEX_BOTH_SLOPE;
    let ctrla = |sim: &SimBoard| sim.read_u8(AddressSpace::S0, S0_CTRLA).unwrap();
    hw.set_sslope(2).unwrap();
    assert_eq!(ctrla(&sim) & (slope | both), slope | both);
    hw.set_sslope(0).unwrap();
    assert_eq!(ctrla(&sim) & (slope | both), slope);
    hw.set_sslope(1).unwrap();
    assert_eq!(ctrla(&sim) & (slope | both), 0);
    assert!(matches!(
        hw.set_sslope(3),
        Err(BoardError::OutOfRange { name: "sslope", .. })
    ));

    hw.set_bslope(2).unwrap();
    assert_eq!(sim.read_u32(AddressSpace::S0, S0_BSLOPE).unwrap(), 2);
    assert!(hw.set_bslope(7).is_err());
}

#[test]
fn delays_carry_the_enable_bit() {
    let (hw, sim) = board();
    let read = |address| sim.read_u32(AddressSpace::S0, address).unwrap();
    hw.set_sdat(100).unwrap();
    hw.set_bdat(200).unwrap();
    hw.set_bec(300).unwrap();
    hw.set_xckdelay(400).unwrap();
    assert_eq!(read(S0_SDAT), 100 | DELAY_BIT_ENABLE);
    assert_eq!(read(S0_BDAT), 200 | DELAY_BIT_ENABLE);
    assert_eq!(read(S0_BEC), 300 | DELAY_BIT_ENABLE);
    assert_eq!(read(S0_XCKDLY), 400 | DELAY_BIT_ENABLE);

    hw.set_xckdelay(0).unwrap();
    assert_eq!(read(S0_XCKDLY), 0);
    assert!(matches!(
        hw.set_sdat(DELAY_BIT_ENABLE),
        Err(BoardError::OutOfRange { name: "sdat_in_10ns", .. })
    ));

    hw.clear_all_user_regs().unwrap();
    for address in [S0_SDAT, S0_BDAT, S0_BEC, S0_SEC] {
        assert_eq!(read(address), 0);
    }
}

#[test]
fn trigger_dividers() {
    let (hw, sim) = board();
    hw.set_ticnt(5).unwrap();
    hw.set_tocnt(0).unwrap();
    assert_eq!(
        sim.read_u8(AddressSpace::S0, S0_TOR_TICNT).unwrap(),
        5 | TOR_BIT_ENABLE
    );
    assert_eq!(sim.read_u8(AddressSpace::S0, S0_TOR_TOCNT).unwrap(), 0);
    assert!(matches!(
        hw.set_tocnt(0x80),
        Err(BoardError::OutOfRange { name: "tocnt", .. })
    ));
}

#[test]
fn delay_stage_counters() {
    let (hw, sim) = board();
    sim.write_u32(AddressSpace::S0, S0_A2DSC, 17).unwrap();
    sim.write_u32(AddressSpace::S0, S0_L2DSC, 16).unwrap();
    assert_eq!(hw.get_dsc(2).unwrap(), (17, 16));
    assert_eq!(hw.get_dsc(1).unwrap(), (0, 0));

    hw.set_dir_dsc(2, true).unwrap();
    hw.set_dir_dsc(1, false).unwrap();
    assert_eq!(
        sim.read_u32(AddressSpace::S0, S0_DSCCTRL).unwrap(),
        DSCCTRL_BIT_DIR_2
    );

    hw.reset_dsc(2).unwrap();
    assert_eq!(hw.get_dsc(2).unwrap(), (0, 0));
    // the reset bit is pulsed, the direction stays
    assert_eq!(
        sim.read_u32(AddressSpace::S0, S0_DSCCTRL).unwrap(),
        DSCCTRL_BIT_DIR_2
    );
    assert!(matches!(
        hw.reset_dsc(3),
        Err(BoardError::OutOfRange { name: "dsc", .. })
    ));
}
