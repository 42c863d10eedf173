//! LED output driver
//!
//! The mode state machine only ever hands a duty value (0..=255) to a
//! [`DutyWriter`]; on the board that is a LEDC low-speed PWM channel with an
//! 8-bit timer.

/// Sink for the computed duty cycle
pub trait DutyWriter {
    /// Drive the output with `duty` out of 255
    fn write_duty(&mut self, duty: u8);
}

impl<W: DutyWriter + ?Sized> DutyWriter for &mut W {
    fn write_duty(&mut self, duty: u8) {
        (**self).write_duty(duty);
    }
}

#[cfg(feature = "device")]
pub use ledc::{LedcOutput, init_ledc_output};

#[cfg(feature = "device")]
mod ledc {
    use super::DutyWriter;
    use crate::{BoardError, config};
    use esp_hal::gpio::interconnect::PeripheralOutput;
    use esp_hal::ledc::channel::{self as ledc_channel, ChannelHW as _, ChannelIFace as _};
    use esp_hal::ledc::timer::{self as ledc_timer, TimerIFace as _};
    use esp_hal::ledc::{LSGlobalClkSource, Ledc, LowSpeed};
    use esp_hal::time::Rate;
    use static_cell::StaticCell;

    static LEDC_CELL: StaticCell<Ledc<'static>> = StaticCell::new();
    static LED_TIMER_CELL: StaticCell<ledc_timer::Timer<'static, LowSpeed>> = StaticCell::new();

    /// LEDC channel 0 driving the lamp
    pub struct LedcOutput<'d> {
        channel: ledc_channel::Channel<'d, LowSpeed>,
        last_duty: Option<u8>,
    }

    impl DutyWriter for LedcOutput<'_> {
        fn write_duty(&mut self, duty: u8) {
            // Skip register writes while the duty is steady
            if self.last_duty == Some(duty) {
                return;
            }
            self.channel.set_duty_hw(duty as u32);
            self.last_duty = Some(duty);
        }
    }

    /// Configure timer 0 at 5 kHz / 8 bit and attach channel 0 to the LED pin.
    ///
    /// Must be called once; the LEDC block and its timer are kept in statics.
    pub fn init_ledc_output(
        ledc: esp_hal::peripherals::LEDC<'static>,
        pin: impl PeripheralOutput<'static>,
    ) -> Result<LedcOutput<'static>, BoardError> {
        let ledc = LEDC_CELL.init(Ledc::new(ledc));
        ledc.set_global_slow_clock(LSGlobalClkSource::APBClk);

        let mut timer = ledc.timer::<LowSpeed>(ledc_timer::Number::Timer0);
        timer
            .configure(ledc_timer::config::Config {
                duty: ledc_timer::config::Duty::Duty8Bit,
                clock_source: ledc_timer::LSClockSource::APBClk,
                frequency: Rate::from_hz(config::LEDC_FREQ_HZ),
            })
            .map_err(|_| BoardError::LedError)?;
        let timer = LED_TIMER_CELL.init(timer);

        let mut channel = ledc.channel::<LowSpeed>(ledc_channel::Number::Channel0, pin);
        channel
            .configure(ledc_channel::config::Config {
                timer: &*timer,
                duty_pct: 0,
                pin_config: ledc_channel::config::PinConfig::PushPull,
            })
            .map_err(|_| BoardError::LedError)?;

        log::info!(
            "[LED] LEDC channel 0 on GPIO{} at {} Hz, 8-bit",
            config::LED_PIN,
            config::LEDC_FREQ_HZ
        );

        Ok(LedcOutput {
            channel,
            last_duty: None,
        })
    }
}
