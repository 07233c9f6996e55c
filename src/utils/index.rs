use ethers::types::Address;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressParseError {
	#[error("invalid hex in address {0:?}")]
	InvalidHex(String),

	#[error("address {0:?} is not 20 bytes long")]
	InvalidLength(String),
}

/// Parse an address in any case, with or without the `0x` prefix.
pub fn parse_address(raw: &str) -> Result<Address, AddressParseError> {
	let trimmed = raw.trim();
	let stripped = trimmed
		.strip_prefix("0x")
		.or_else(|| trimmed.strip_prefix("0X"))
		.unwrap_or(trimmed);
	let bytes =
		hex::decode(stripped).map_err(|_| AddressParseError::InvalidHex(raw.to_string()))?;
	if bytes.len() != Address::len_bytes() {
		return Err(AddressParseError::InvalidLength(raw.to_string()));
	}
	Ok(Address::from_slice(&bytes))
}

/// Normalized form used for store keys and set members: lowercase hex, no prefix.
pub fn address_key(address: &Address) -> String {
	hex::encode(address.as_bytes())
}

/// Split the inclusive range `[from, to]` into consecutive inclusive chunks of at most `size` blocks.
///
/// Yields nothing when `from > to` or `size == 0`.
pub fn block_chunks(from: u64, to: u64, size: u64) -> impl Iterator<Item = (u64, u64)> {
	let mut next = (size > 0 && from <= to).then_some(from);
	std::iter::from_fn(move || {
		let start = next?;
		let end = start.saturating_add(size - 1).min(to);
		next = if end < to { Some(end + 1) } else { None };
		Some((start, end))
	})
}
