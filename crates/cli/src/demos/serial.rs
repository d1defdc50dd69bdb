// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::DemoOutcome;
use crate::target::Target;
use anyhow::Result;
use regbench_hal::dma::{DmaChannel, DmaDescriptor};
use regbench_hal::nvic::Nvic;
use regbench_hal::shared::{SharedCounter, SpscRing};
use regbench_hal::usart::Usart;
use regbench_hal::wait::wait_until;
use regbench_hal::Bus;
use std::sync::Arc;

const BAUD: u32 = 115_200;
/// USART1 RX is wired to DMA1 channel 5.
const RX_DMA_CHANNEL: u8 = 5;
/// Receive buffer offset from the start of RAM.
const RX_BUFFER_OFFSET: u64 = 0x400;

pub fn usart_echo(target: &mut Target) -> Result<DemoOutcome> {
    target.configure_clocks()?;
    let usart = target.usart("usart1")?;
    let pclk = target.pclk("usart1")?;
    let irq = target.irq("usart1")?;
    let policy = target.policy;
    let machine = &mut target.machine;
    usart.configure(machine, pclk, BAUD)?;

    let rx = Arc::new(SpscRing::<32>::new());
    let producer = rx.clone();
    machine.register_handler(Nvic::vector(irq), move |bus| loop {
        match usart.try_recv(bus) {
            Ok(Some(byte)) => {
                if !producer.push(byte) {
                    tracing::warn!("USART1 receive ring full, dropped {:#04x}", byte);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("USART1 handler: {}", e);
                break;
            }
        }
    });
    usart.enable_rx_interrupt(machine, true)?;
    Nvic::default().enable_irq(machine, irq)?;

    let message = b"hello regbench\r\n";
    machine.inject_usart_rx("usart1", message)?;
    let mut echoed = 0;
    while echoed < message.len() {
        wait_until(machine, policy, "echo byte", |_| Ok(!rx.is_empty()))?;
        while let Some(byte) = rx.pop() {
            usart.send_blocking(machine, byte, policy)?;
            echoed += 1;
        }
    }
    usart.flush(machine, policy)?;

    let tx = machine.usart_tx("usart1");
    Ok(DemoOutcome::check(
        tx == message,
        format!(
            "echoed {:?} at {} baud",
            String::from_utf8_lossy(&tx),
            BAUD
        ),
    ))
}

pub fn dma_rx(target: &mut Target) -> Result<DemoOutcome> {
    target.configure_clocks()?;
    target.enable_clock("dma1")?;
    let usart = target.usart("usart1")?;
    let pclk = target.pclk("usart1")?;
    let channel = DmaChannel::new(target.base("dma1")?, RX_DMA_CHANNEL)?;
    let irq = channel.irq(target.irq("dma1")?);
    let buffer = target.chip.ram.base + RX_BUFFER_OFFSET;
    let budget = target.step_budget();
    let policy = target.policy;
    let machine = &mut target.machine;
    usart.configure(machine, pclk, BAUD)?;

    let message = b"dma says hi";
    let completions = Arc::new(SharedCounter::default());
    let seen = completions.clone();
    machine.register_handler(Nvic::vector(irq), move |bus| {
        match channel.clear_complete(bus) {
            Ok(true) => {
                seen.increment();
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("DMA1 channel {} handler: {}", channel.number(), e),
        }
    });
    Nvic::default().enable_irq(machine, irq)?;

    let count = message.len() as u32;
    let desc = DmaDescriptor {
        complete_interrupt: true,
        ..DmaDescriptor::peripheral_to_memory(usart.rx_data_address(), buffer, count)
    };
    channel.configure(machine, &desc)?;
    usart.enable_rx_dma(machine, true)?;
    machine.inject_usart_rx("usart1", message)?;
    machine.run_until(budget, |_| completions.load() >= 1)?;
    // Let a duplicate completion show up if the flag was not cleared.
    machine.run(100)?;

    let mut received = vec![0u8; message.len()];
    for (i, byte) in received.iter_mut().enumerate() {
        *byte = machine.read_u8(buffer + i as u64)?;
    }
    usart.write_all(machine, &received, policy)?;
    usart.flush(machine, policy)?;

    let count = completions.load();
    let echo = machine.usart_tx("usart1");
    Ok(DemoOutcome::check(
        echo == message && count == 1,
        format!(
            "{} bytes landed at {:#x}, {} completion interrupt(s), echoed {:?}",
            received.len(),
            buffer,
            count,
            String::from_utf8_lossy(&echo)
        ),
    ))
}
