//! Pointer-path expression parser
//!
//! Grammar (whitespace ignored except inside quoted module names):
//!
//! ```text
//! expr      := modpart? offsets?
//! modpart   := (QUOTED_STRING | BARE_NAME) (("+"|"-") hex_sum)?
//! offsets   := ("," ("+"|"-")? hex_sum)+
//! hex_sum   := hex (("+"|"-") hex)*
//! ```
//!
//! A bare head is a module name unless it is a valid hexadecimal number
//! fitting in 64 bits, in which case it is the initial absolute pointer.

use std::num::IntErrorKind;

use super::offset::PointerOffset;
use super::PointerPath;

/// Error type for pointer-path parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathParseError {
    /// The expression is empty
    #[error("Empty pointer-path expression")]
    Empty,

    /// A quoted module name is missing its closing quote
    #[error("Unterminated quoted module name")]
    UnterminatedQuote,

    /// A quoted module name is empty
    #[error("Empty module name")]
    EmptyModuleName,

    /// A term is not valid hexadecimal
    #[error("Invalid hexadecimal value: {0:?}")]
    InvalidHex(String),

    /// A single term exceeds 64 bits
    #[error("Hexadecimal value does not fit 64 bits: {0:?}")]
    ValueOverflow(String),

    /// Summing the terms of one offset overflowed 64 bits
    #[error("Offset sum overflowed in segment {0}")]
    SumOverflow(usize),

    /// A comma with nothing after it
    #[error("Empty offset segment at index {0}")]
    EmptyOffset(usize),

    /// The expression ends on a dangling `+` or `-`
    #[error("Expression ends with a dangling operator")]
    TrailingOperator,

    /// A module-less path must start with a non-negative absolute address
    #[error("Initial absolute address cannot be negative")]
    NegativeAddress,
}

/// Parse a full expression into a [`PointerPath`]
pub(super) fn parse_expression(input: &str) -> Result<PointerPath, PathParseError> {
    let segments = split_segments(input)?;
    let head = segments.first().ok_or(PathParseError::Empty)?;
    if head.is_empty() && segments.len() == 1 {
        return Err(PathParseError::Empty);
    }

    let (module, mut offsets) = parse_head(head)?;

    for (index, segment) in segments.iter().enumerate().skip(1) {
        if segment.is_empty() {
            return Err(PathParseError::EmptyOffset(index));
        }
        offsets.push(parse_signed_sum(segment, true, index)?);
    }

    if module.is_none() && offsets.is_empty() {
        return Err(PathParseError::Empty);
    }

    Ok(PointerPath { module, offsets })
}

/// Split on commas, dropping whitespace outside quotes and keeping it inside
fn split_segments(input: &str) -> Result<Vec<String>, PathParseError> {
    let mut segments = vec![String::new()];
    let mut in_quote = false;
    for c in input.chars() {
        match c {
            '"' => {
                in_quote = !in_quote;
                segments.last_mut().expect("nonempty").push(c);
            }
            ',' if !in_quote => segments.push(String::new()),
            c if c.is_whitespace() && !in_quote => {}
            c => segments.last_mut().expect("nonempty").push(c),
        }
    }
    if in_quote {
        return Err(PathParseError::UnterminatedQuote);
    }
    Ok(segments)
}

/// Parse the head segment: a module part, or the initial absolute address
#[allow(clippy::type_complexity)]
fn parse_head(
    head: &str,
) -> Result<(Option<(String, PointerOffset)>, Vec<PointerOffset>), PathParseError> {
    if head.is_empty() {
        // `expr := offsets` alone is not in the grammar; the caller rejects
        // an entirely empty expression and a leading comma lands here.
        return Err(PathParseError::Empty);
    }

    if let Some(rest) = head.strip_prefix('"') {
        let (name, tail) = rest
            .split_once('"')
            .ok_or(PathParseError::UnterminatedQuote)?;
        if name.is_empty() {
            return Err(PathParseError::EmptyModuleName);
        }
        let offset = if tail.is_empty() {
            PointerOffset::ZERO
        } else if tail.starts_with(['+', '-']) {
            parse_signed_sum(tail, false, 0)?
        } else {
            return Err(PathParseError::InvalidHex(tail.to_string()));
        };
        return Ok((Some((name.to_string(), offset)), Vec::new()));
    }

    // Bare head: the part before the first sign is either a module name or
    // a hexadecimal address.
    let split_at = head.find(['+', '-']).unwrap_or(head.len());
    let (name_part, tail) = head.split_at(split_at);
    if name_part.is_empty() {
        return Err(PathParseError::InvalidHex(head.to_string()));
    }

    match u64::from_str_radix(name_part, 16) {
        Ok(address) => {
            // Valid 64-bit hex: this is the initial pointer, with any
            // trailing sum folded in.
            let mut total = address as i128;
            if !tail.is_empty() {
                total += parse_signed_sum(tail, false, 0)?.signed();
            }
            if total < 0 {
                return Err(PathParseError::NegativeAddress);
            }
            if total > u64::MAX as i128 {
                return Err(PathParseError::ValueOverflow(head.to_string()));
            }
            Ok((None, vec![PointerOffset::from(total as u64)]))
        }
        Err(_) => {
            // Not a 64-bit number: module name
            let offset = if tail.is_empty() {
                PointerOffset::ZERO
            } else {
                parse_signed_sum(tail, false, 0)?
            };
            Ok((Some((name_part.to_string(), offset)), Vec::new()))
        }
    }
}

/// Parse `("+"|"-")? hex (("+"|"-") hex)*` into a folded offset.
///
/// `allow_unsigned_first` permits the first term to omit its sign (offset
/// segments); the sum attached to a module head always carries one.
fn parse_signed_sum(
    text: &str,
    allow_unsigned_first: bool,
    segment: usize,
) -> Result<PointerOffset, PathParseError> {
    let mut chars = text.char_indices().peekable();
    let mut sum: i128 = 0;
    let mut first = true;

    while let Some(&(start, c)) = chars.peek() {
        let negative = match c {
            '+' => {
                chars.next();
                false
            }
            '-' => {
                chars.next();
                true
            }
            _ if first && allow_unsigned_first => false,
            _ => return Err(PathParseError::InvalidHex(text[start..].to_string())),
        };
        first = false;

        let term_start = chars.peek().map(|&(i, _)| i).unwrap_or(text.len());
        while chars.peek().is_some_and(|&(_, c)| c.is_ascii_hexdigit()) {
            chars.next();
        }
        let term_end = chars.peek().map(|&(i, _)| i).unwrap_or(text.len());
        let term = &text[term_start..term_end];
        if term.is_empty() {
            return if chars.peek().is_some() {
                Err(PathParseError::InvalidHex(text[term_start..].to_string()))
            } else {
                Err(PathParseError::TrailingOperator)
            };
        }

        let value = u64::from_str_radix(term, 16).map_err(|e| match e.kind() {
            IntErrorKind::PosOverflow => PathParseError::ValueOverflow(term.to_string()),
            _ => PathParseError::InvalidHex(term.to_string()),
        })?;

        sum += if negative {
            -(value as i128)
        } else {
            value as i128
        };
        if sum.unsigned_abs() > u128::from(u64::MAX) {
            return Err(PathParseError::SumOverflow(segment));
        }
    }

    if first {
        // No terms at all
        return Err(PathParseError::TrailingOperator);
    }

    Ok(PointerOffset::new(sum.unsigned_abs() as u64, sum < 0))
}
