use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use tmc2130::Tmc2130;
use tmc2208::Tmc2208;
use tmc2660::Tmc2660;
use tracing::{info, warn};
use utilities::{
    lazy_tcp::{LazyTcpStream, StreamTimeouts},
    spi_bridge::SpiBridge,
    stepper_driver::{ChipFamily, StepperDriver},
};

use crate::{
    config::{AxisConfig, MonitorConfig, TransportConfig},
    monitor::MonitoredAxis,
};

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const WRITE_TIMEOUT: Duration = Duration::from_millis(100);
const CONNECT_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_RETRIES: u32 = 3;

fn tcp_stream(ip: IpAddr, port: u16) -> LazyTcpStream {
    LazyTcpStream::new(
        SocketAddr::new(ip, port),
        MAX_RETRIES,
        StreamTimeouts {
            read: READ_TIMEOUT,
            write: WRITE_TIMEOUT,
            connect: CONNECT_TIMEOUT,
        },
    )
}

/// Builds and programs the driver of one axis. A driver whose `init` fails
/// is still returned: its status reads fail and get logged every poll until
/// the bus answers again.
fn create_driver(config: &AxisConfig) -> Option<Box<dyn StepperDriver>> {
    let settings = config.driver_settings();

    let (driver, init): (Box<dyn StepperDriver>, _) = match (config.chip, config.transport) {
        (ChipFamily::Tmc2130, TransportConfig::Spi { ip, port, chip_select }) => {
            let mut driver = Tmc2130::new(
                SpiBridge::new(tcp_stream(ip, port), chip_select),
                config.rsense,
            );
            let init = driver.init(&settings);
            (Box::new(driver), init)
        }
        (ChipFamily::Tmc2660, TransportConfig::Spi { ip, port, chip_select }) => {
            let mut driver = Tmc2660::new(
                SpiBridge::new(tcp_stream(ip, port), chip_select),
                config.rsense,
            );
            let init = driver.init(&settings);
            (Box::new(driver), init)
        }
        (ChipFamily::Tmc2208, TransportConfig::Uart { ip, port, address }) => {
            let mut driver = Tmc2208::new(tcp_stream(ip, port), address, config.rsense);
            let init = driver.init(&settings);
            (Box::new(driver), init)
        }
        (chip, _) => {
            warn!("Skipping {}: {} cannot use this transport", config.axis, chip);
            return None;
        }
    };

    match init {
        Ok(()) => info!("{} {} driver initialised", config.axis, config.chip),
        Err(e) => warn!("Failed to initialise {} driver: {}", config.axis, e),
    }

    Some(driver)
}

/// One monitored axis per configured driver, in configuration order.
pub fn create_axes(config: &MonitorConfig) -> Vec<MonitoredAxis> {
    config
        .axes
        .iter()
        .filter_map(|axis| {
            create_driver(axis)
                .map(|driver| MonitoredAxis::new(axis.axis, driver, axis.steps_per_mm))
        })
        .collect()
}
