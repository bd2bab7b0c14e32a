//! Method header formats (ECMA-335 II.25.4).
//!
//! A body is either *tiny* (one header byte, at most 63 bytes of code, a stack of at most 8,
//! no locals, no exception handling) or *fat* (12 byte header followed by the code, then
//! 4-byte aligned extra sections carrying exception clauses in small or fat form).
//!
//! ```rust
//! use dotemit::metadata::method::MethodBody;
//!
//! // ldc.i4.1; ret
//! let encoded = MethodBody::encode(&[0x17, 0x2A], 1, 0, false, &[])?;
//! assert_eq!(encoded, vec![0x0A, 0x17, 0x2A]);
//!
//! let body = MethodBody::from(&encoded)?;
//! assert!(!body.is_fat);
//! assert_eq!(body.code(&encoded), &[0x17, 0x2A]);
//! # Ok::<(), dotemit::Error>(())
//! ```

use crate::{
    file::io::{read_le, read_le_at, WriteLe},
    metadata::method::{
        ExceptionHandler, ExceptionHandlerFlags, MethodBodyFlags, SectionFlags,
    },
    utils::pad_to,
    Result,
};

/// Largest code size a tiny header can describe.
pub const MAX_TINY_CODE_SIZE: usize = 0x3F;
/// Largest evaluation stack a tiny header implies.
pub const MAX_TINY_STACK: u16 = 8;

/// The parsed header of one method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    /// Size of the method (length of all instructions, not counting the header) in bytes
    pub size_code: usize,
    /// Size of the method header in bytes
    pub size_header: usize,
    /// `StandAloneSig` token describing the locals, 0 == no local variables
    pub local_var_sig_token: u32,
    /// Maximum number of items on the operand stack
    pub max_stack: usize,
    /// Flag, indicating the type of the method header
    pub is_fat: bool,
    /// Flag, indicating to call default constructor on all local variables
    pub is_init_local: bool,
    /// Flag, indicating if this method does have exception handlers
    pub is_exception_data: bool,
    /// The exception clauses of this method
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Parse a method body header from the bytes at its RVA.
    ///
    /// # Errors
    /// Returns an error if the data is empty, out of bounds, or malformed.
    pub fn from(data: &[u8]) -> Result<MethodBody> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_00000011_u8)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(out_of_bounds_error!());
                }

                Ok(MethodBody {
                    size_code,
                    size_header: 1,
                    local_var_sig_token: 0,
                    max_stack: MAX_TINY_STACK as usize,
                    is_fat: false,
                    is_init_local: false,
                    is_exception_data: false,
                    exception_handlers: Vec::new(),
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                if data.len() < 12 {
                    return Err(out_of_bounds_error!());
                }

                let first_duo = read_le::<u16>(data)?;

                let size_header = (first_duo >> 12) as usize * 4;
                let size_code = read_le::<u32>(&data[4..])? as usize;
                if data.len() < size_code + size_header {
                    return Err(out_of_bounds_error!());
                }

                let local_var_sig_token = read_le::<u32>(&data[8..])?;
                let flags_header =
                    MethodBodyFlags::from_bits_truncate(first_duo & 0b_0000111111111111_u16);
                let max_stack = read_le::<u16>(&data[2..])? as usize;

                let exception_handlers = if flags_header.contains(MethodBodyFlags::MORE_SECTS) {
                    Self::parse_sections(data, (size_header + size_code + 3) & !3)?
                } else {
                    Vec::new()
                };

                Ok(MethodBody {
                    size_code,
                    size_header,
                    local_var_sig_token,
                    max_stack,
                    is_fat: true,
                    is_init_local: flags_header.contains(MethodBodyFlags::INIT_LOCALS),
                    is_exception_data: !exception_handlers.is_empty(),
                    exception_handlers,
                })
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    // II.25.4.5, the extra sections currently can only contain exception handling data
    fn parse_sections(data: &[u8], mut cursor: usize) -> Result<Vec<ExceptionHandler>> {
        let mut exception_handlers = Vec::new();

        while data.len() >= cursor + 4 {
            let section_flags = SectionFlags::from_bits_truncate(read_le::<u8>(&data[cursor..])?);
            if !section_flags.contains(SectionFlags::EHTABLE) {
                break;
            }

            let is_fat = section_flags.contains(SectionFlags::FAT_FORMAT);
            let section_size = if is_fat {
                read_le::<u32>(&data[cursor..])? >> 8
            } else {
                u32::from(read_le::<u8>(&data[cursor + 1..])?)
            } as usize;
            if section_size < 4 || data.len() < cursor + section_size {
                log::warn!("Truncated exception section at body offset {cursor}");
                break;
            }

            let mut offset = cursor + 4;
            if is_fat {
                for _ in 0..(section_size - 4) / 24 {
                    #[allow(clippy::cast_possible_truncation)]
                    let flags = ExceptionHandlerFlags::from_bits_truncate(
                        read_le_at::<u32>(data, &mut offset)? as u16,
                    );
                    let ranges = [
                        read_le_at::<u32>(data, &mut offset)?,
                        read_le_at::<u32>(data, &mut offset)?,
                        read_le_at::<u32>(data, &mut offset)?,
                        read_le_at::<u32>(data, &mut offset)?,
                    ];
                    let class_or_filter = read_le_at::<u32>(data, &mut offset)?;
                    exception_handlers.push(ExceptionHandler::from_raw(
                        flags,
                        ranges,
                        class_or_filter,
                    ));
                }
            } else {
                for _ in 0..(section_size - 4) / 12 {
                    let flags =
                        ExceptionHandlerFlags::from_bits_truncate(read_le_at::<u16>(data, &mut offset)?);
                    let ranges = [
                        u32::from(read_le_at::<u16>(data, &mut offset)?),
                        u32::from(read_le_at::<u8>(data, &mut offset)?),
                        u32::from(read_le_at::<u16>(data, &mut offset)?),
                        u32::from(read_le_at::<u8>(data, &mut offset)?),
                    ];
                    let class_or_filter = read_le_at::<u32>(data, &mut offset)?;
                    exception_handlers.push(ExceptionHandler::from_raw(
                        flags,
                        ranges,
                        class_or_filter,
                    ));
                }
            }

            if !section_flags.contains(SectionFlags::MORE_SECTS) {
                break;
            }
            cursor = (cursor + section_size + 3) & !3;
        }

        Ok(exception_handlers)
    }

    /// Get the full size of this method, header and code
    #[must_use]
    pub fn size(&self) -> usize {
        self.size_code + self.size_header
    }

    /// The instruction bytes within `data`, the same slice this header was parsed from.
    #[must_use]
    pub fn code<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        data.get(self.size_header..self.size()).unwrap_or(&[])
    }

    /// Encode a complete body: header, code and exception sections.
    ///
    /// The tiny format is chosen whenever the body allows it. Exception clauses are
    /// written in the small section format if every clause and the section size fit.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] if the exception section exceeds the
    /// 24 bit section size.
    pub fn encode(
        code: &[u8],
        max_stack: u16,
        local_var_sig_token: u32,
        init_locals: bool,
        handlers: &[ExceptionHandler],
    ) -> Result<Vec<u8>> {
        let is_tiny = code.len() <= MAX_TINY_CODE_SIZE
            && max_stack <= MAX_TINY_STACK
            && local_var_sig_token == 0
            && handlers.is_empty();

        let mut buffer = Vec::with_capacity(code.len() + 12);
        if is_tiny {
            #[allow(clippy::cast_possible_truncation)]
            let header = ((code.len() as u8) << 2) | MethodBodyFlags::TINY_FORMAT.bits() as u8;
            buffer.push(header);
            buffer.extend_from_slice(code);
            return Ok(buffer);
        }

        let mut flags = MethodBodyFlags::FAT_FORMAT;
        if init_locals {
            flags |= MethodBodyFlags::INIT_LOCALS;
        }
        if !handlers.is_empty() {
            flags |= MethodBodyFlags::MORE_SECTS;
        }

        #[allow(clippy::cast_possible_truncation)]
        let code_size = code.len() as u32;
        buffer.write_le::<u16>((3 << 12) | flags.bits());
        buffer.write_le::<u16>(max_stack);
        buffer.write_le::<u32>(code_size);
        buffer.write_le::<u32>(local_var_sig_token);
        buffer.extend_from_slice(code);

        if handlers.is_empty() {
            return Ok(buffer);
        }

        pad_to(&mut buffer, 4);
        let small_size = 4 + handlers.len() * 12;
        if small_size <= 0xFF && handlers.iter().all(ExceptionHandler::fits_small) {
            buffer.push(SectionFlags::EHTABLE.bits());
            #[allow(clippy::cast_possible_truncation)]
            let section_size = small_size as u8;
            buffer.push(section_size);
            buffer.write_le::<u16>(0);
            for handler in handlers {
                #[allow(clippy::cast_possible_truncation)]
                let (try_offset, try_length, handler_offset, handler_length) = (
                    handler.try_offset as u16,
                    handler.try_length as u8,
                    handler.handler_offset as u16,
                    handler.handler_length as u8,
                );
                buffer.write_le::<u16>(handler.flags.bits());
                buffer.write_le::<u16>(try_offset);
                buffer.write_le::<u8>(try_length);
                buffer.write_le::<u16>(handler_offset);
                buffer.write_le::<u8>(handler_length);
                buffer.write_le::<u32>(handler.class_or_filter());
            }
        } else {
            let fat_size = 4 + handlers.len() * 24;
            if fat_size > 0x00FF_FFFF {
                return Err(invalid_operation!(
                    "Too many exception clauses ({})",
                    handlers.len()
                ));
            }
            #[allow(clippy::cast_possible_truncation)]
            let section_header = ((fat_size as u32) << 8)
                | u32::from((SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits());
            buffer.write_le::<u32>(section_header);
            for handler in handlers {
                buffer.write_le::<u32>(u32::from(handler.flags.bits()));
                buffer.write_le::<u32>(handler.try_offset);
                buffer.write_le::<u32>(handler.try_length);
                buffer.write_le::<u32>(handler.handler_offset);
                buffer.write_le::<u32>(handler.handler_length);
                buffer.write_le::<u32>(handler.class_or_filter());
            }
        }

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::token::Token;

    fn finally_clause(try_length: u32) -> ExceptionHandler {
        ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_offset: 0,
            try_length,
            handler_offset: try_length,
            handler_length: 2,
            class_token: Token::default(),
            filter_offset: 0,
        }
    }

    #[test]
    fn tiny() {
        let encoded = MethodBody::encode(&[0x2A], 8, 0, true, &[]).unwrap();
        assert_eq!(encoded, vec![0x06, 0x2A]);

        let method_header = MethodBody::from(&encoded).unwrap();
        assert!(!method_header.is_fat);
        assert!(!method_header.is_exception_data);
        assert_eq!(method_header.size_code, 1);
        assert_eq!(method_header.size_header, 1);
        assert_eq!(method_header.size(), 2);
        assert_eq!(method_header.local_var_sig_token, 0);
    }

    #[test]
    fn empty_body_is_tiny() {
        let encoded = MethodBody::encode(&[], 0, 0, false, &[]).unwrap();
        assert_eq!(encoded, vec![0x02]);
        assert_eq!(MethodBody::from(&encoded).unwrap().size_code, 0);
    }

    #[test]
    fn fat_when_locals() {
        let encoded = MethodBody::encode(&[0x00, 0x2A], 2, 0x1100_0001, true, &[]).unwrap();
        assert_eq!(encoded.len(), 14);
        assert_eq!(&encoded[..2], &[0x13, 0x30]);

        let method_header = MethodBody::from(&encoded).unwrap();
        assert!(method_header.is_fat);
        assert!(method_header.is_init_local);
        assert_eq!(method_header.max_stack, 2);
        assert_eq!(method_header.size_code, 2);
        assert_eq!(method_header.size_header, 12);
        assert_eq!(method_header.local_var_sig_token, 0x1100_0001);
        assert_eq!(method_header.code(&encoded), &[0x00, 0x2A]);
    }

    #[test]
    fn small_exception_section() {
        let catch = ExceptionHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_offset: 0,
            try_length: 5,
            handler_offset: 5,
            handler_length: 3,
            class_token: Token::new(0x0100_0002),
            filter_offset: 0,
        };
        let code = vec![0x00; 9];
        let encoded = MethodBody::encode(&code, 1, 0, false, &[catch, finally_clause(5)]).unwrap();

        // 12 header + 9 code, padded to 24, then the section header
        assert_eq!(encoded[24], SectionFlags::EHTABLE.bits());
        assert_eq!(encoded[25], 4 + 2 * 12);

        let method_header = MethodBody::from(&encoded).unwrap();
        assert!(method_header.is_exception_data);
        assert_eq!(method_header.exception_handlers, vec![catch, finally_clause(5)]);
    }

    #[test]
    fn fat_exception_section() {
        let filter = ExceptionHandler {
            flags: ExceptionHandlerFlags::FILTER,
            try_offset: 0,
            try_length: 0x100,
            handler_offset: 0x110,
            handler_length: 4,
            class_token: Token::default(),
            filter_offset: 0x100,
        };
        let code = vec![0x00; 0x120];
        let encoded = MethodBody::encode(&code, 2, 0, false, &[filter]).unwrap();

        let section = 12 + 0x120;
        assert_eq!(
            encoded[section],
            (SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits()
        );

        let method_header = MethodBody::from(&encoded).unwrap();
        assert_eq!(method_header.exception_handlers, vec![filter]);
    }

    #[test]
    fn malformed() {
        assert!(MethodBody::from(&[]).is_err());
        assert!(MethodBody::from(&[0x01]).is_err());
        assert!(MethodBody::from(&[0x0E]).is_err());
        assert!(MethodBody::from(&[0x03, 0x30, 0x00]).is_err());
    }
}
