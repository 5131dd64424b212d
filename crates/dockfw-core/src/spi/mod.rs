//! SPI transactions and the JEDEC opcodes used against package storage and
//! SPI hub flash

mod command;
pub mod opcodes;

pub use command::{SpiCommand, ADDRESS_LEN, MAX_HEADER_LEN};
pub use opcodes::EraseSize;
