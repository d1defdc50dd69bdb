// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use regbench_config::BoardManifest;
use regbench_core::peripherals::rcc::{self, RccCr};
use regbench_core::peripherals::{dma, exti, flash, nvic, usart};
use regbench_core::{Bus, Machine};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const RCC: u64 = 0x4002_1000;
const FLASH: u64 = 0x4002_2000;
const EXTI: u64 = 0x4001_0400;
const USART1: u64 = 0x4001_3800;
const DMA1: u64 = 0x4002_0000;
const NVIC: u64 = 0xE000_E100;

fn bluepill() -> Machine {
    let board = BoardManifest::builtin("bluepill").unwrap();
    Machine::from_board(&board).unwrap()
}

fn enable_irq(machine: &mut Machine, irq: u32) {
    let (offset, bit) = nvic::irq_word(irq);
    machine.write_u32(NVIC + nvic::ISER + offset, bit).unwrap();
}

fn switch_to_pll_72mhz(machine: &mut Machine) {
    machine
        .modify_u32(RCC + rcc::CR, 0, RccCr::HSEON.bits())
        .unwrap();
    let ready = machine
        .run_until(10_000, |m| {
            m.read_u32(RCC + rcc::CR).unwrap() & RccCr::HSERDY.bits() != 0
        })
        .unwrap();
    assert!(ready, "HSE never became ready");

    let cfgr = rcc::CFGR_PLLSRC
        | (rcc::pllmul_bits(9) << rcc::CFGR_PLLMUL_SHIFT)
        | (rcc::ppre_bits(2) << rcc::CFGR_PPRE1_SHIFT);
    machine.write_u32(RCC + rcc::CFGR, cfgr).unwrap();
    machine
        .modify_u32(RCC + rcc::CR, 0, RccCr::PLLON.bits())
        .unwrap();
    let locked = machine
        .run_until(10_000, |m| {
            m.read_u32(RCC + rcc::CR).unwrap() & RccCr::PLLRDY.bits() != 0
        })
        .unwrap();
    assert!(locked, "PLL never locked");

    machine
        .modify_u32(
            RCC + rcc::CFGR,
            0x3 << rcc::CFGR_SW_SHIFT,
            rcc::SysclkSource::Pll.bits() << rcc::CFGR_SW_SHIFT,
        )
        .unwrap();
    let switched = machine
        .run_until(100, |m| {
            (m.read_u32(RCC + rcc::CFGR).unwrap() >> rcc::CFGR_SWS_SHIFT) & 0x3
                == rcc::SysclkSource::Pll.bits()
        })
        .unwrap();
    assert!(switched, "SYSCLK never switched to the PLL");
}

#[test]
fn test_pll_switch_without_wait_states_is_a_flash_violation() {
    let mut machine = bluepill();
    switch_to_pll_72mhz(&mut machine);
    assert_eq!(machine.bus.clocks.sysclk_hz(), 72_000_000);
    assert_eq!(machine.bus.clocks.flash_violations(), 1);
}

#[test]
fn test_raising_latency_first_keeps_flash_timing() {
    let mut machine = bluepill();
    machine
        .write_u32(FLASH + flash::ACR, 2 | flash::ACR_PRFTBE)
        .unwrap();
    switch_to_pll_72mhz(&mut machine);
    assert_eq!(machine.bus.clocks.sysclk_hz(), 72_000_000);
    assert_eq!(machine.bus.clocks.flash_violations(), 0);
}

#[test]
fn test_missing_crystal_never_reports_hse_ready() {
    let mut board = BoardManifest::builtin("bluepill").unwrap();
    board.crystal_present = false;
    let mut machine = Machine::from_board(&board).unwrap();
    machine
        .modify_u32(RCC + rcc::CR, 0, RccCr::HSEON.bits())
        .unwrap();
    let ready = machine
        .run_until(5_000, |m| {
            m.read_u32(RCC + rcc::CR).unwrap() & RccCr::HSERDY.bits() != 0
        })
        .unwrap();
    assert!(!ready);
}

#[test]
fn test_usart_receive_by_dma_into_ram() {
    let mut machine = bluepill();
    // DMA1 on AHB bit 0, USART1 on APB2 bit 14.
    machine.modify_u32(RCC + rcc::AHBENR, 0, 1).unwrap();
    machine.modify_u32(RCC + rcc::APB2ENR, 0, 1 << 14).unwrap();

    // USART1_RX is DMA1 channel 5.
    let ch = 4;
    machine
        .write_u32(DMA1 + dma::cpar_offset(ch), (USART1 + usart::f1::DR) as u32)
        .unwrap();
    machine
        .write_u32(DMA1 + dma::cmar_offset(ch), 0x2000_0100)
        .unwrap();
    machine.write_u32(DMA1 + dma::cndtr_offset(ch), 4).unwrap();
    machine
        .write_u32(
            DMA1 + dma::ccr_offset(ch),
            dma::CCR_MINC | dma::CCR_TCIE | dma::CCR_EN,
        )
        .unwrap();
    enable_irq(&mut machine, 11 + ch as u32);

    machine.write_u32(USART1 + usart::f1::BRR, 16).unwrap();
    machine
        .write_u32(USART1 + usart::f1::CR3, usart::CR3_DMAR)
        .unwrap();
    machine
        .write_u32(USART1 + usart::f1::CR1, usart::f1::CR1_UE | usart::CR1_RE)
        .unwrap();

    let completions = Arc::new(AtomicU32::new(0));
    let c = completions.clone();
    machine.register_handler(11 + ch as u32 + 16, move |bus: &mut dyn Bus| {
        bus.write_u32(DMA1 + dma::IFCR, dma::channel_flags(4, dma::FLAG_GIF))
            .unwrap();
        c.fetch_add(1, Ordering::Relaxed);
    });

    machine.inject_usart_rx("usart1", b"ping").unwrap();
    let done = machine
        .run_until(2_000, |_| completions.load(Ordering::Relaxed) > 0)
        .unwrap();
    assert!(done, "DMA transfer never completed");

    let received = machine.bus.ram.slice(0x2000_0100, 4).unwrap();
    assert_eq!(received, b"ping");
    assert_eq!(machine.read_u32(DMA1 + dma::cndtr_offset(ch)).unwrap(), 0);

    machine.run(50).unwrap();
    assert_eq!(completions.load(Ordering::Relaxed), 1);
}

#[test]
fn test_button_edge_reaches_exti_handler() {
    let mut machine = bluepill();
    // AFIO (bit 0) and GPIOA (bit 2) on APB2.
    machine.modify_u32(RCC + rcc::APB2ENR, 0, 0b101).unwrap();
    machine.write_u32(EXTI + exti::IMR, 1).unwrap();
    machine.write_u32(EXTI + exti::RTSR, 1).unwrap();
    let irq = exti::line_irq(0).unwrap();
    enable_irq(&mut machine, irq);

    let presses = Arc::new(AtomicU32::new(0));
    let p = presses.clone();
    machine.register_handler(irq + 16, move |bus: &mut dyn Bus| {
        bus.write_u32(EXTI + exti::PR, 1).unwrap();
        p.fetch_add(1, Ordering::Relaxed);
    });

    machine.drive_pin("gpioa", 0, true).unwrap();
    machine.run(5).unwrap();
    // Falling edge is not selected.
    machine.drive_pin("gpioa", 0, false).unwrap();
    machine.run(5).unwrap();
    machine.drive_pin("gpioa", 0, true).unwrap();
    machine.run(5).unwrap();

    assert_eq!(presses.load(Ordering::Relaxed), 2);
}

#[test]
fn test_writes_before_clock_enable_are_dropped() {
    let mut machine = bluepill();
    machine.bus.enable_access_log();
    machine
        .write_u32(USART1 + usart::f1::CR1, usart::f1::CR1_UE)
        .unwrap();
    assert_eq!(machine.bus.gate_violations(), 1);
    machine.modify_u32(RCC + rcc::APB2ENR, 0, 1 << 14).unwrap();
    assert_eq!(machine.read_u32(USART1 + usart::f1::CR1).unwrap(), 0);

    let log = machine.bus.access_log();
    assert!(log.iter().any(|a| a.peripheral == "usart1" && a.gated_off));
}
