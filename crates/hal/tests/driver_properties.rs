// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use regbench_config::BoardManifest;
use regbench_core::peripherals::dma::Dma1;
use regbench_core::peripherals::gpio::{f1, v2};
use regbench_core::Machine;
use regbench_hal::clock::{ClockConfigurator, ClockPreset};
use regbench_hal::dma::{DmaChannel, DmaDescriptor};
use regbench_hal::gate::{self, gates};
use regbench_hal::gpio::{F1Gpio, GpioMode, GpioPort, Pins, V2Gpio};
use regbench_hal::i2c::I2c;
use regbench_hal::map::{self, irq};
use regbench_hal::nvic::Nvic;
use regbench_hal::shared::{SharedCounter, SpscRing};
use regbench_hal::systick::SysTick;
use regbench_hal::systime::MillisClock;
use regbench_hal::timer::Timer;
use regbench_hal::usart::{F1Usart, Usart};
use regbench_hal::{Bus, HalError, WaitPolicy};
use std::sync::Arc;

fn bluepill() -> Machine {
    let board = BoardManifest::builtin("bluepill").unwrap();
    Machine::from_board(&board).unwrap()
}

#[test]
fn test_clock_enable_precedes_block_writes() {
    let mut machine = bluepill();
    machine.bus.enable_access_log();

    gate::enable(&mut machine, gates::USART1).unwrap();
    F1Usart::new(map::USART1)
        .configure(&mut machine, 8_000_000, 115_200)
        .unwrap();
    gate::enable(&mut machine, gates::TIM2).unwrap();
    Timer::new(map::TIM2)
        .configure_periodic(&mut machine, 7, 999, false)
        .unwrap();

    let log = machine.bus.access_log();
    for block in ["usart1", "tim2"] {
        let first_access = log.iter().position(|a| a.peripheral == block).unwrap();
        let gate_write = log
            .iter()
            .position(|a| a.peripheral == "rcc" && a.write)
            .unwrap();
        assert!(gate_write < first_access, "{} touched before its gate", block);
    }
    assert!(log.iter().all(|a| !a.gated_off));
    assert_eq!(machine.bus.gate_violations(), 0);
}

#[test]
fn test_forgotten_gate_is_recorded() {
    let mut machine = bluepill();
    Timer::new(map::TIM3)
        .configure_periodic(&mut machine, 0, 9, false)
        .unwrap();
    assert!(machine.bus.gate_violations() > 0);
    assert_eq!(Timer::new(map::TIM3).counter(&mut machine).unwrap(), 0);
}

fn f1_nibble(mode: GpioMode) -> u32 {
    match mode {
        GpioMode::Analog => 0x0,
        GpioMode::InputFloating => 0x4,
        GpioMode::InputPullUp | GpioMode::InputPullDown => 0x8,
        GpioMode::OutputPushPull => 0x3,
        GpioMode::OutputOpenDrain => 0x7,
        GpioMode::Alternate { open_drain, .. } => {
            if open_drain {
                0xF
            } else {
                0xB
            }
        }
    }
}

fn config_nibbles(machine: &mut Machine, base: u64) -> [u32; 16] {
    let crl = machine.read_u32(base + f1::CRL).unwrap();
    let crh = machine.read_u32(base + f1::CRH).unwrap();
    std::array::from_fn(|pin| {
        let reg = if pin < 8 { crl } else { crh };
        (reg >> ((pin % 8) * 4)) & 0xF
    })
}

#[test]
fn test_gpio_configure_touches_only_masked_pins() {
    let mut machine = bluepill();
    gate::enable(&mut machine, gates::GPIOB).unwrap();
    let port = F1Gpio::new(map::GPIOB);
    let modes = [
        GpioMode::OutputPushPull,
        GpioMode::InputPullUp,
        GpioMode::Analog,
        GpioMode::OutputOpenDrain,
        GpioMode::InputPullDown,
        GpioMode::Alternate {
            af: 0,
            open_drain: false,
        },
        GpioMode::InputFloating,
    ];

    let mut seed: u32 = 0x1234_5678;
    for round in 0..64 {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let mask = ((seed >> 8) as u16) | 1;
        let mode = modes[round % modes.len()];

        let before = config_nibbles(&mut machine, map::GPIOB);
        let odr_before = port.read_output(&mut machine).unwrap();
        port.configure(&mut machine, mask, mode).unwrap();
        let after = config_nibbles(&mut machine, map::GPIOB);
        let odr_after = port.read_output(&mut machine).unwrap();

        for pin in 0..16 {
            if mask & (1 << pin) != 0 {
                assert_eq!(after[pin], f1_nibble(mode), "pin {} mode {:?}", pin, mode);
            } else {
                assert_eq!(after[pin], before[pin], "pin {} outside {:#06x}", pin, mask);
            }
        }
        assert_eq!(odr_after & !mask, odr_before & !mask);
    }
}

/// OTYPER, OSPEEDR, PUPDR, AFRL, AFRH and MODER of a v2 port.
fn v2_registers(machine: &mut Machine, base: u64) -> [u32; 6] {
    [v2::OTYPER, v2::OSPEEDR, v2::PUPDR, v2::AFRL, v2::AFRH, v2::MODER]
        .map(|reg| machine.read_u32(base + reg).unwrap())
}

/// The `width`-bit field of `pin`, across AFRL/AFRH for 4-bit fields.
fn v2_field(regs: &[u32; 6], index: usize, pin: usize, width: usize) -> u32 {
    let (reg, slot) = match index {
        3 | 4 => (regs[3 + pin / 8], pin % 8),
        _ => (regs[index], pin),
    };
    (reg >> (slot * width)) & ((1 << width) - 1)
}

#[test]
fn test_v2_gpio_configure_touches_only_masked_fields() {
    let board = BoardManifest::builtin("f3discovery").unwrap();
    let chip = board.load_chip().unwrap();
    let mut machine = Machine::from_board(&board).unwrap();
    gate::enable(&mut machine, gates::v2::GPIOB).unwrap();
    let base = chip.peripheral("gpiob").unwrap().base_address;
    let port = V2Gpio::new(base);
    let modes = [
        GpioMode::OutputPushPull,
        GpioMode::Alternate {
            af: 7,
            open_drain: true,
        },
        GpioMode::InputPullUp,
        GpioMode::Analog,
        GpioMode::OutputOpenDrain,
        GpioMode::InputPullDown,
        GpioMode::Alternate {
            af: 2,
            open_drain: false,
        },
        GpioMode::InputFloating,
    ];

    let mut seed: u32 = 0x9E37_79B9;
    let mut next = || {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        seed
    };
    // Start from noise so untouched fields have something to keep.
    for reg in [v2::OTYPER, v2::OSPEEDR, v2::PUPDR, v2::AFRL, v2::AFRH, v2::MODER] {
        let value = next();
        machine.write_u32(base + reg, value).unwrap();
    }

    for round in 0..64 {
        let mask = ((next() >> 8) as u16) | 1;
        let mode = modes[round % modes.len()];
        let (moder, pull, drives) = match mode {
            GpioMode::InputFloating => (0b00, 0b00, false),
            GpioMode::InputPullUp => (0b00, 0b01, false),
            GpioMode::InputPullDown => (0b00, 0b10, false),
            GpioMode::OutputPushPull | GpioMode::OutputOpenDrain => (0b01, 0b00, true),
            GpioMode::Alternate { .. } => (0b10, 0b00, true),
            GpioMode::Analog => (0b11, 0b00, false),
        };
        let open_drain = matches!(
            mode,
            GpioMode::OutputOpenDrain | GpioMode::Alternate { open_drain: true, .. }
        );
        let af = match mode {
            GpioMode::Alternate { af, .. } => Some(af as u32),
            _ => None,
        };

        let before = v2_registers(&mut machine, base);
        port.configure(&mut machine, mask, mode).unwrap();
        let after = v2_registers(&mut machine, base);

        // (register, field width, value for a selected pin when written)
        let fields = [
            (0, 1, Some(open_drain as u32)),
            (1, 2, drives.then_some(0b11)),
            (2, 2, Some(pull)),
            (3, 4, af),
            (5, 2, Some(moder)),
        ];
        for pin in 0..16 {
            let selected = mask & (1 << pin) != 0;
            for (index, width, value) in fields {
                let old = v2_field(&before, index, pin, width);
                let new = v2_field(&after, index, pin, width);
                match value {
                    Some(value) if selected => {
                        assert_eq!(new, value, "reg {} pin {} mode {:?}", index, pin, mode)
                    }
                    _ => assert_eq!(new, old, "reg {} pin {} mask {:#06x}", index, pin, mask),
                }
            }
        }
    }
}

#[test]
fn test_pins_reject_bad_masks() {
    let port = F1Gpio::new(map::GPIOA);
    assert!(matches!(
        Pins::new(port, 0),
        Err(HalError::InvalidPinMask { mask: 0 })
    ));
    assert!(Pins::new(port, 0x1_0000).is_err());
    assert!(Pins::pin(port, 16).is_err());
}

#[test]
fn test_reinvoked_handler_with_clear_flag_is_a_noop() {
    let mut machine = bluepill();
    gate::enable(&mut machine, gates::TIM2).unwrap();
    let timer = Timer::new(map::TIM2);
    let updates = Arc::new(SharedCounter::default());
    let vector = Nvic::vector(irq::TIM2);

    let seen = updates.clone();
    machine.register_handler(vector, move |bus| {
        let pending = timer.update_pending(bus).unwrap_or(false);
        // Cleared on entry whether or not it was set.
        let _ = timer.clear_update(bus);
        if pending {
            seen.increment();
        }
    });
    Nvic::default().enable_irq(&mut machine, irq::TIM2).unwrap();
    timer.configure_periodic(&mut machine, 0, 9, true).unwrap();

    assert!(machine
        .run_until(100, |m| m.dispatch_count(vector) == 1)
        .unwrap());
    timer.stop(&mut machine).unwrap();
    assert_eq!(updates.load(), 1);

    machine.pend(vector);
    machine.step().unwrap();
    assert_eq!(machine.dispatch_count(vector), 2);
    assert_eq!(updates.load(), 1);
    assert!(!timer.update_pending(&mut machine).unwrap());
}

#[test]
fn test_forgotten_flag_clear_redispatches_every_step() {
    let mut machine = bluepill();
    gate::enable(&mut machine, gates::TIM3).unwrap();
    let timer = Timer::new(map::TIM3);
    let vector = Nvic::vector(irq::TIM3);
    machine.register_handler(vector, |_bus| {});
    Nvic::default().enable_irq(&mut machine, irq::TIM3).unwrap();
    timer.configure_periodic(&mut machine, 0, 999, true).unwrap();

    assert!(machine
        .run_until(2_000, |m| m.dispatch_count(vector) == 1)
        .unwrap());
    machine.run(10).unwrap();
    assert_eq!(machine.dispatch_count(vector), 11);

    timer.clear_update(&mut machine).unwrap();
    timer.stop(&mut machine).unwrap();
    machine.run(10).unwrap();
    assert_eq!(machine.dispatch_count(vector), 11);
}

#[test]
fn test_millisecond_counter_tracks_interrupts() {
    let mut machine = bluepill();
    let clock = MillisClock::new();
    clock.install(&mut machine);
    SysTick::new().configure(&mut machine, 49, true).unwrap();

    machine.run(5_000).unwrap();
    assert_eq!(clock.now(), 100);
    assert_eq!(machine.systick_count(), 100);

    for d in [1, 7, 30] {
        let start = clock.now();
        clock
            .msleep(&mut machine, d, WaitPolicy::Bounded(10_000))
            .unwrap();
        assert!(clock.now().wrapping_sub(start) >= d);
    }
}

#[test]
fn test_72mhz_systick_scenario() {
    let mut machine = bluepill().with_cycles_per_step(72_000);
    let tree = ClockConfigurator::new()
        .apply(&mut machine, &ClockPreset::hse_8mhz_to_72mhz())
        .unwrap();
    assert_eq!(tree.hclk, 72_000_000);
    assert_eq!(SysTick::for_millis(&tree).unwrap(), 71_999);

    let clock = MillisClock::new();
    clock.start(&mut machine, &tree).unwrap();
    let ticked = machine.run_until(2_000, |_| clock.now() >= 1_000).unwrap();
    assert!(ticked);
    assert_eq!(clock.now(), 1_000);

    clock
        .msleep(&mut machine, 500, WaitPolicy::Bounded(1_000))
        .unwrap();
    let now = clock.now();
    assert!((1_499..=1_501).contains(&now), "msleep returned at {}", now);
    assert_eq!(machine.bus.clocks.flash_violations(), 0);
}

#[test]
fn test_dma_moves_exactly_count_and_completes_once() {
    let mut machine = bluepill();
    gate::enable(&mut machine, gates::DMA1).unwrap();

    let src = 0x2000_0000;
    let dst = 0x2000_2000;
    for i in 0..1000u64 {
        machine.write_u8(src + i, i as u8).unwrap();
    }

    let channel = DmaChannel::new(map::DMA1, 1).unwrap();
    let desc = DmaDescriptor {
        dst_increment: false,
        ..DmaDescriptor::memory_to_memory(src, dst, 1000)
    };
    channel.configure(&mut machine, &desc).unwrap();

    assert!(machine
        .run_until(5_000, |m| channel.transfer_complete(m).unwrap())
        .unwrap());
    assert_eq!(channel.remaining(&mut machine).unwrap(), 0);
    let dma = machine.bus.peripheral::<Dma1>("dma1").unwrap();
    assert_eq!(dma.moved(0), 1000);
    // Fixed destination holds the last element.
    assert_eq!(machine.read_u8(dst).unwrap(), (999 % 256) as u8);
    assert_eq!(machine.read_u8(dst + 1).unwrap(), 0);

    assert!(channel.clear_complete(&mut machine).unwrap());
    assert!(!channel.clear_complete(&mut machine).unwrap());
}

#[test]
fn test_missing_crystal_times_out() {
    let mut board = BoardManifest::builtin("bluepill").unwrap();
    board.crystal_present = false;
    let mut machine = Machine::from_board(&board).unwrap();
    let err = ClockConfigurator::new()
        .with_policy(WaitPolicy::Bounded(2_000))
        .apply(&mut machine, &ClockPreset::hse_8mhz_to_72mhz())
        .unwrap_err();
    assert!(matches!(err, HalError::Timeout { what: "HSE ready" }));
}

#[test]
fn test_usart_interrupt_echo() {
    let mut machine = bluepill();
    gate::enable(&mut machine, gates::USART1).unwrap();
    let usart = F1Usart::new(map::USART1);
    usart.configure(&mut machine, 8_000_000, 115_200).unwrap();

    let rx = Arc::new(SpscRing::<32>::new());
    let producer = rx.clone();
    machine.register_handler(Nvic::vector(irq::USART1), move |bus| {
        while let Ok(Some(byte)) = usart.try_recv(bus) {
            producer.push(byte);
        }
    });
    usart.enable_rx_interrupt(&mut machine, true).unwrap();
    Nvic::default().enable_irq(&mut machine, irq::USART1).unwrap();

    let message = b"echo 42\r\n";
    machine.inject_usart_rx("usart1", message).unwrap();
    let mut echoed = 0;
    while echoed < message.len() {
        regbench_hal::wait::wait_until(
            &mut machine,
            WaitPolicy::Bounded(5_000),
            "echo byte",
            |_| Ok(!rx.is_empty()),
        )
        .unwrap();
        while let Some(byte) = rx.pop() {
            usart
                .send_blocking(&mut machine, byte, WaitPolicy::Bounded(5_000))
                .unwrap();
            echoed += 1;
        }
    }
    usart.flush(&mut machine, WaitPolicy::Bounded(5_000)).unwrap();
    assert_eq!(machine.usart_tx("usart1"), message.to_vec());
    assert!(!usart.clear_overrun(&mut machine).unwrap());
}

#[test]
fn test_i2c_nack_surfaces_as_error() {
    let mut machine = bluepill();
    gate::enable(&mut machine, gates::I2C1).unwrap();
    let i2c = I2c::new(map::I2C1).with_policy(WaitPolicy::Bounded(500));
    i2c.configure(&mut machine, 8_000_000).unwrap();

    let mut buf = [0u8; 2];
    let err = i2c.write_read(&mut machine, 0x77, &[0], &mut buf).unwrap_err();
    assert!(matches!(err, HalError::Nack { addr: 0x77 }));
}
