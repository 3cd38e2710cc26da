use super::{LinkPort, LinkResult, PortError};
use crate::config::LinkConfig;
use esp_idf_svc::hal::delay::TickType;
use esp_idf_svc::hal::gpio::{AnyIOPin, InputPin, OutputPin};
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::hal::uart::{config::Config as UartConfig, Uart, UartDriver};
use esp_idf_svc::hal::units::Hertz;
use log::debug;

/// UART で実装したシリアルリンク
pub struct UartLink<'d> {
    driver: UartDriver<'d>,
}

impl<'d> UartLink<'d> {
    /// UART ドライバを 8N1 で初期化します
    ///
    /// # 引数
    ///
    /// * `uart` - UART ペリフェラル
    /// * `tx` - 相手の RX に繋がる TX ピン
    /// * `rx` - 相手の TX に繋がる RX ピン
    /// * `config` - ボーレートなどのリンク設定
    pub fn new<U: Uart>(
        uart: impl Peripheral<P = U> + 'd,
        tx: impl Peripheral<P = impl OutputPin> + 'd,
        rx: impl Peripheral<P = impl InputPin> + 'd,
        config: &LinkConfig,
    ) -> LinkResult<Self> {
        let uart_config = UartConfig::default()
            .baudrate(Hertz(config.baud_rate))
            .data_bits(esp_idf_svc::hal::uart::config::DataBits::DataBits8)
            .parity_none()
            .stop_bits(esp_idf_svc::hal::uart::config::StopBits::STOP1);

        let driver = UartDriver::new(
            uart,
            tx,
            rx,
            Option::<AnyIOPin>::None,
            Option::<AnyIOPin>::None,
            &uart_config,
        )
        .map_err(|e| PortError::InitError(format!("UART initialization failed: {}", e)))?;

        debug!("UART link initialized at {} baud (8N1)", config.baud_rate);
        Ok(UartLink { driver })
    }
}

impl LinkPort for UartLink<'_> {
    fn write(&mut self, data: &[u8], _timeout_ms: u32) -> LinkResult<usize> {
        self.driver.write(data).map_err(|e| e.into())
    }

    fn read(&mut self, buffer: &mut [u8], timeout_ms: u32) -> LinkResult<usize> {
        let ticks = TickType::new_millis(timeout_ms as u64).ticks();
        self.driver.read(buffer, ticks).map_err(|e| e.into())
    }
}
