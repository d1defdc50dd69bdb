// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod adc;
pub mod afio;
pub mod dac;
pub mod dma;
pub mod exti;
pub mod flash;
pub mod gpio;
pub mod i2c;
pub mod nvic;
pub mod rcc;
pub mod spi;
pub mod systick;
pub mod timer;
pub mod usart;

use std::str::FromStr;

/// Register map family. GPIO and USART differ between the two; the other
/// blocks share one map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterLayout {
    #[default]
    Stm32F1,
    Stm32V2,
}

impl FromStr for RegisterLayout {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let v = value.trim().to_ascii_lowercase();
        match v.as_str() {
            "stm32f1" | "f1" | "legacy" => Ok(Self::Stm32F1),
            "stm32v2" | "v2" | "modern" | "stm32f3" | "f3" => Ok(Self::Stm32V2),
            _ => Err(format!(
                "unsupported register layout '{}'; supported: stm32f1, stm32v2",
                value
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RegisterLayout;

    #[test]
    fn test_layout_aliases() {
        assert_eq!("F1".parse::<RegisterLayout>(), Ok(RegisterLayout::Stm32F1));
        assert_eq!(" modern ".parse::<RegisterLayout>(), Ok(RegisterLayout::Stm32V2));
        assert!("h7".parse::<RegisterLayout>().is_err());
    }
}
