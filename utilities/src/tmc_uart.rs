use std::io::{Read, Write};

const SYNC: u8 = 0x05;
const MASTER_ADDRESS: u8 = 0xFF;
const WRITE_BIT: u8 = 0x80;

const READ_REQUEST_LEN: usize = 4;
const REPLY_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum UartError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CRC error: expected 0x{expected:02X}, received 0x{received:02X}")]
    InvalidCrc { expected: u8, received: u8 },

    #[error("Invalid sync byte 0x{0:02X}")]
    InvalidSync(u8),

    #[error("Invalid master address 0x{0:02X}")]
    InvalidMasterAddress(u8),

    #[error("Invalid register in reply: expected 0x{expected:02X}, received 0x{received:02X}")]
    InvalidRegister { expected: u8, received: u8 },
}

/// CRC-8 (polynomial x^8 + x^2 + x + 1) as used by the Trinamic UART
/// interface. Bytes are shifted in LSB first.
pub fn calculate_crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;

    for &byte in data {
        let mut current = byte;
        for _ in 0..8 {
            if ((crc >> 7) ^ (current & 0x01)) != 0 {
                crc = (crc << 1) ^ 0x07;
            } else {
                crc <<= 1;
            }
            current >>= 1;
        }
    }

    crc
}

/// Single-wire UART register access for TMC22xx drivers.
#[derive(Clone, Debug)]
pub struct TmcUart {
    slave: u8,
}

impl TmcUart {
    pub fn new(slave: u8) -> Self {
        Self { slave }
    }

    pub fn slave(&self) -> u8 {
        self.slave
    }

    pub fn read_register<T: Read + Write>(
        &self,
        client: &mut T,
        register: u8,
    ) -> Result<u32, UartError> {
        let mut request = [SYNC, self.slave, register & !WRITE_BIT, 0];
        request[READ_REQUEST_LEN - 1] = calculate_crc8(&request[..READ_REQUEST_LEN - 1]);

        client.write_all(&request)?;
        client.flush()?;

        let mut reply = [0u8; REPLY_LEN];
        client.read_exact(&mut reply)?;

        let expected = calculate_crc8(&reply[..REPLY_LEN - 1]);
        let received = reply[REPLY_LEN - 1];
        if expected != received {
            return Err(UartError::InvalidCrc { expected, received });
        }

        if reply[0] & 0x0F != SYNC {
            return Err(UartError::InvalidSync(reply[0]));
        }

        if reply[1] != MASTER_ADDRESS {
            return Err(UartError::InvalidMasterAddress(reply[1]));
        }

        if reply[2] != register {
            return Err(UartError::InvalidRegister {
                expected: register,
                received: reply[2],
            });
        }

        Ok(u32::from_be_bytes([reply[3], reply[4], reply[5], reply[6]]))
    }

    pub fn write_register<T: Read + Write>(
        &self,
        client: &mut T,
        register: u8,
        value: u32,
    ) -> Result<(), UartError> {
        let data = value.to_be_bytes();

        let mut request = [
            SYNC,
            self.slave,
            register | WRITE_BIT,
            data[0],
            data[1],
            data[2],
            data[3],
            0,
        ];
        request[REPLY_LEN - 1] = calculate_crc8(&request[..REPLY_LEN - 1]);

        client.write_all(&request)?;
        client.flush()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Loopback {
        sent: Vec<u8>,
        pending: VecDeque<u8>,
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.pending.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.pending.pop_front().unwrap_or_default();
            }
            Ok(n)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn reply(register: u8, value: u32) -> Vec<u8> {
        let mut frame = vec![SYNC, MASTER_ADDRESS, register];
        frame.extend_from_slice(&value.to_be_bytes());
        frame.push(calculate_crc8(&frame));
        frame
    }

    #[test]
    fn crc_matches_datasheet_read_request() {
        // GCONF read from slave 0, as listed in the TMC2208 datasheet.
        assert_eq!(calculate_crc8(&[0x05, 0x00, 0x00]), 0x48);
    }

    #[test]
    fn read_register_decodes_reply() {
        let mut link = Loopback::default();
        link.pending.extend(reply(0x6F, 0xC000_0003));

        let uart = TmcUart::new(0);
        let value = uart.read_register(&mut link, 0x6F).unwrap();

        assert_eq!(value, 0xC000_0003);
        assert_eq!(link.sent.len(), READ_REQUEST_LEN);
        assert_eq!(&link.sent[..3], &[SYNC, 0x00, 0x6F]);
    }

    #[test]
    fn read_register_rejects_corrupted_reply() {
        let mut frame = reply(0x6F, 0x1234_5678);
        frame[4] ^= 0x01;

        let mut link = Loopback::default();
        link.pending.extend(frame);

        let err = TmcUart::new(0).read_register(&mut link, 0x6F).unwrap_err();
        assert!(matches!(err, UartError::InvalidCrc { .. }));
    }

    #[test]
    fn read_register_rejects_reply_for_other_register() {
        let mut link = Loopback::default();
        link.pending.extend(reply(0x01, 0));

        let err = TmcUart::new(0).read_register(&mut link, 0x6F).unwrap_err();
        assert!(matches!(
            err,
            UartError::InvalidRegister {
                expected: 0x6F,
                received: 0x01
            }
        ));
    }

    #[test]
    fn write_register_sets_write_bit() {
        let mut link = Loopback::default();
        TmcUart::new(3)
            .write_register(&mut link, 0x10, 0x0001_1F10)
            .unwrap();

        assert_eq!(
            &link.sent[..7],
            &[SYNC, 0x03, 0x90, 0x00, 0x01, 0x1F, 0x10]
        );
        assert_eq!(link.sent[7], calculate_crc8(&link.sent[..7]));
    }
}
