// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

#[cfg(test)]
mod machine_tests {
    use crate::bus::{PeripheralEntry, SystemBus};
    use crate::metrics::PerformanceMetrics;
    use crate::peripherals::nvic::{self, Nvic, NvicState};
    use crate::peripherals::systick::{self, Systick};
    use crate::{Bus, Machine, Peripheral, PeripheralTickResult, SimResult};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    const NVIC_BASE: u64 = 0xE000_E100;
    const SYSTICK_BASE: u64 = 0xE000_E010;
    const SRC_A: u64 = 0x4000_0000;
    const SRC_B: u64 = 0x4000_1000;
    const IRQ_A: u32 = 5;
    const IRQ_B: u32 = 3;

    /// Level interrupt source: offset 0 is an rc_w0 flag, writing offset 4 raises it.
    #[derive(Debug, Default)]
    struct FlagSource {
        flag: u32,
    }

    impl Peripheral for FlagSource {
        fn read(&mut self, offset: u64) -> SimResult<u32> {
            Ok(if offset == 0 { self.flag } else { 0 })
        }

        fn write(&mut self, offset: u64, value: u32) -> SimResult<()> {
            match offset {
                0 => self.flag &= value,
                4 => self.flag |= value & 1,
                _ => {}
            }
            Ok(())
        }

        fn peek(&self, offset: u64) -> u32 {
            if offset == 0 {
                self.flag
            } else {
                0
            }
        }

        fn tick(&mut self, _cycles: u32) -> PeripheralTickResult {
            PeripheralTickResult {
                irq: self.flag != 0,
                ..Default::default()
            }
        }
    }

    fn create_machine() -> Machine {
        let mut bus = SystemBus::new();
        let state = Arc::new(NvicState::default());
        bus.nvic = Some(state.clone());
        bus.add_peripheral(PeripheralEntry::new(
            "nvic",
            NVIC_BASE,
            0x400,
            Box::new(Nvic::new(state)),
        ))
        .unwrap();
        bus.add_peripheral(
            PeripheralEntry::new("systick", SYSTICK_BASE, 0x10, Box::new(Systick::new()))
                .with_vector(crate::interrupt::SYSTICK_VECTOR),
        )
        .unwrap();
        bus.add_peripheral(
            PeripheralEntry::new("src_a", SRC_A, 0x100, Box::<FlagSource>::default())
                .with_irq(IRQ_A),
        )
        .unwrap();
        bus.add_peripheral(
            PeripheralEntry::new("src_b", SRC_B, 0x100, Box::<FlagSource>::default())
                .with_irq(IRQ_B),
        )
        .unwrap();
        Machine::new(bus)
    }

    fn enable_irq(machine: &mut Machine, irq: u32) {
        let (offset, bit) = nvic::irq_word(irq);
        machine.write_u32(NVIC_BASE + nvic::ISER + offset, bit).unwrap();
    }

    fn raise(machine: &mut Machine, base: u64) {
        machine.write_u32(base + 4, 1).unwrap();
    }

    #[test]
    fn test_handler_that_clears_flag_runs_once() {
        let mut machine = create_machine();
        enable_irq(&mut machine, IRQ_A);
        machine.register_handler(IRQ_A + 16, |bus: &mut dyn Bus| {
            bus.write_u32(SRC_A, 0).unwrap();
        });

        raise(&mut machine, SRC_A);
        machine.run(10).unwrap();
        assert_eq!(machine.dispatch_count(IRQ_A + 16), 1);
    }

    #[test]
    fn test_handler_that_forgets_flag_is_reentered_every_step() {
        let mut machine = create_machine();
        enable_irq(&mut machine, IRQ_A);
        machine.register_handler(IRQ_A + 16, |_bus: &mut dyn Bus| {});

        raise(&mut machine, SRC_A);
        machine.run(10).unwrap();
        assert_eq!(machine.dispatch_count(IRQ_A + 16), 10);
    }

    #[test]
    fn test_dispatch_in_ascending_vector_order() {
        let mut machine = create_machine();
        enable_irq(&mut machine, IRQ_A);
        enable_irq(&mut machine, IRQ_B);
        let order = Arc::new(Mutex::new(Vec::new()));

        for (irq, base) in [(IRQ_A, SRC_A), (IRQ_B, SRC_B)] {
            let order = order.clone();
            machine.register_handler(irq + 16, move |bus: &mut dyn Bus| {
                order.lock().unwrap().push(irq + 16);
                bus.write_u32(base, 0).unwrap();
            });
        }

        raise(&mut machine, SRC_A);
        raise(&mut machine, SRC_B);
        machine.step().unwrap();
        assert_eq!(*order.lock().unwrap(), vec![IRQ_B + 16, IRQ_A + 16]);
    }

    #[test]
    fn test_disabled_irq_stays_pending() {
        let mut machine = create_machine();
        machine.register_handler(IRQ_A + 16, |bus: &mut dyn Bus| {
            bus.write_u32(SRC_A, 0).unwrap();
        });
        raise(&mut machine, SRC_A);
        machine.run(3).unwrap();
        assert_eq!(machine.dispatch_count(IRQ_A + 16), 0);
        assert!(machine.bus.nvic.as_ref().unwrap().is_pending(IRQ_A));

        enable_irq(&mut machine, IRQ_A);
        machine.step().unwrap();
        assert_eq!(machine.dispatch_count(IRQ_A + 16), 1);
    }

    #[test]
    fn test_unhandled_vector_recorded() {
        let mut machine = create_machine();
        enable_irq(&mut machine, IRQ_B);
        raise(&mut machine, SRC_B);
        machine.run(4).unwrap();
        assert!(machine.stats().unhandled.contains(&(IRQ_B + 16)));
        assert_eq!(machine.dispatch_count(IRQ_B + 16), 0);
    }

    #[test]
    fn test_register_handler_reports_replacement() {
        let mut machine = create_machine();
        assert!(!machine.register_handler(20, |_bus: &mut dyn Bus| {}));
        assert!(machine.register_handler(20, |_bus: &mut dyn Bus| {}));
        assert!(machine.unregister_handler(20));
        assert!(!machine.unregister_handler(20));
    }

    #[test]
    fn test_systick_exception_dispatch() {
        let mut machine = create_machine();
        let ticks = Arc::new(AtomicU32::new(0));
        let t = ticks.clone();
        machine.register_handler(crate::interrupt::SYSTICK_VECTOR, move |_bus: &mut dyn Bus| {
            t.fetch_add(1, Ordering::Relaxed);
        });

        machine.write_u32(SYSTICK_BASE + systick::RVR, 9).unwrap();
        machine.write_u32(SYSTICK_BASE + systick::CVR, 0).unwrap();
        machine
            .write_u32(
                SYSTICK_BASE + systick::CSR,
                systick::CSR_ENABLE | systick::CSR_TICKINT | systick::CSR_CLKSOURCE,
            )
            .unwrap();
        machine.run(100).unwrap();

        assert_eq!(ticks.load(Ordering::Relaxed), 10);
        assert_eq!(machine.systick_count(), 10);
    }

    #[test]
    fn test_software_pend() {
        let mut machine = create_machine();
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        machine.register_handler(crate::interrupt::PENDSV_VECTOR, move |_bus: &mut dyn Bus| {
            h.fetch_add(1, Ordering::Relaxed);
        });
        machine.pend(crate::interrupt::PENDSV_VECTOR);
        machine.run(3).unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_blocking_inside_handler_does_not_nest() {
        let mut machine = create_machine();
        enable_irq(&mut machine, IRQ_A);
        enable_irq(&mut machine, IRQ_B);
        let b_runs = Arc::new(AtomicU32::new(0));

        machine.register_handler(IRQ_A + 16, |bus: &mut dyn Bus| {
            bus.write_u32(SRC_A, 0).unwrap();
            // Raise B and wait inside the handler.
            bus.write_u32(SRC_B + 4, 1).unwrap();
            for _ in 0..5 {
                bus.advance().unwrap();
            }
        });
        let b = b_runs.clone();
        machine.register_handler(IRQ_B + 16, move |bus: &mut dyn Bus| {
            b.fetch_add(1, Ordering::Relaxed);
            bus.write_u32(SRC_B, 0).unwrap();
        });

        raise(&mut machine, SRC_A);
        machine.step().unwrap();
        assert_eq!(b_runs.load(Ordering::Relaxed), 0);
        assert_eq!(machine.stats().blocking_in_handler, 5);

        machine.step().unwrap();
        assert_eq!(b_runs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_run_until_and_step_accounting() {
        let mut machine = create_machine().with_cycles_per_step(100);
        let hit = machine.run_until(50, |m| m.steps() >= 7).unwrap();
        assert!(hit);
        assert_eq!(machine.steps(), 7);
        assert_eq!(machine.total_cycles(), 700);

        let hit = machine.run_until(3, |_| false).unwrap();
        assert!(!hit);
        assert_eq!(machine.steps(), 10);
    }

    #[test]
    fn test_observer_sees_writes_and_dispatches() {
        let mut machine = create_machine();
        let metrics = Arc::new(PerformanceMetrics::new());
        machine.add_observer(metrics.clone());
        enable_irq(&mut machine, IRQ_A);
        machine.register_handler(IRQ_A + 16, |bus: &mut dyn Bus| {
            bus.write_u32(SRC_A, 0).unwrap();
        });
        raise(&mut machine, SRC_A);
        machine.run(4).unwrap();

        assert_eq!(metrics.get_steps(), 4);
        // ISER, trigger, and the handler's clear.
        assert_eq!(metrics.get_register_writes(), 3);
        assert_eq!(metrics.get_dispatches().get(&(IRQ_A + 16)), Some(&1));
    }

    #[test]
    fn test_narrow_register_writes_are_observed() {
        let mut machine = create_machine();
        let metrics = Arc::new(PerformanceMetrics::new());
        machine.add_observer(metrics.clone());
        machine.write_u8(SRC_A + 4, 1).unwrap();
        machine.write_u16(SRC_B + 4, 1).unwrap();
        assert_eq!(metrics.get_register_writes(), 2);
        assert_eq!(machine.read_u16(SRC_A).unwrap(), 1);

        // RAM stores are not register writes.
        machine.write_u8(0x2000_0000, 0xAA).unwrap();
        machine.write_u16(0x2000_0002, 0xBBCC).unwrap();
        assert_eq!(metrics.get_register_writes(), 2);
        assert_eq!(machine.read_u16(0x2000_0002).unwrap(), 0xBBCC);
    }

    #[test]
    fn test_snapshot_lists_peripherals() {
        let mut machine = create_machine();
        machine.run(2).unwrap();
        let snap = machine.snapshot();
        assert_eq!(snap.steps, 2);
        assert!(snap.peripherals.contains_key("systick"));
        assert!(snap.to_json_pretty().unwrap().contains("\"steps\": 2"));
    }
}
