pub mod lazy_tcp;
pub mod spi_bridge;
pub mod stepper_driver;
pub mod tmc_uart;
