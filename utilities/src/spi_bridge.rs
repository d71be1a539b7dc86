use std::io::{self, Read, Write};
use std::time::Duration;

use embedded_hal::spi::{self, ErrorKind, ErrorType, Operation, SpiDevice};

/// Release chip-select once this frame has been clocked out.
const FLAG_END_OF_TRANSACTION: u8 = 0x01;

#[derive(Debug, thiserror::Error)]
pub enum SpiBridgeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Transfer of {0} bytes does not fit in one frame")]
    FrameTooLong(usize),
}

impl spi::Error for SpiBridgeError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// SPI device reached through a bus adapter on a byte stream.
///
/// Every operation is sent as `[chip_select, flags, len_hi, len_lo, data..]`
/// and the adapter answers with exactly `len` bytes clocked in on MISO.
pub struct SpiBridge<S> {
    stream: S,
    chip_select: u8,
}

impl<S: Read + Write> SpiBridge<S> {
    pub fn new(stream: S, chip_select: u8) -> Self {
        Self {
            stream,
            chip_select,
        }
    }

    fn exchange(&mut self, tx: &[u8], rx: &mut [u8], last: bool) -> Result<(), SpiBridgeError> {
        let len = u16::try_from(tx.len()).map_err(|_| SpiBridgeError::FrameTooLong(tx.len()))?;
        let flags = if last { FLAG_END_OF_TRANSACTION } else { 0 };

        let mut frame = Vec::with_capacity(4 + tx.len());
        frame.push(self.chip_select);
        frame.push(flags);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(tx);

        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        self.stream.read_exact(rx)?;

        Ok(())
    }
}

impl<S> ErrorType for SpiBridge<S> {
    type Error = SpiBridgeError;
}

impl<S: Read + Write> SpiDevice for SpiBridge<S> {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Self::Error> {
        let count = operations.len();

        for (index, operation) in operations.iter_mut().enumerate() {
            let last = index + 1 == count;

            match operation {
                Operation::Read(buf) => {
                    let tx = vec![0u8; buf.len()];
                    self.exchange(&tx, buf, last)?;
                }
                Operation::Write(buf) => {
                    let mut rx = vec![0u8; buf.len()];
                    self.exchange(buf, &mut rx, last)?;
                }
                Operation::Transfer(read, write) => {
                    let len = read.len().max(write.len());
                    let mut tx = write.to_vec();
                    tx.resize(len, 0);
                    let mut rx = vec![0u8; len];
                    self.exchange(&tx, &mut rx, last)?;
                    read.copy_from_slice(&rx[..read.len()]);
                }
                Operation::TransferInPlace(buf) => {
                    let tx = buf.to_vec();
                    self.exchange(&tx, buf, last)?;
                }
                Operation::DelayNs(ns) => {
                    std::thread::sleep(Duration::from_nanos(u64::from(*ns)));
                }
            }
        }

        Ok(())
    }
}
