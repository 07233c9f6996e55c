//! Types for decoding token contract logs and describing log queries

use ethers::providers::ProviderError;
use ethers::types::{Address, Filter, H256, Log, U256, ValueOrArray};
use ethers::utils::keccak256;
use std::time::Duration;

/// Kinds of log query the sync engine issues against the token contract.
///
/// Transfers are queried twice, once matching the sender topic and once matching the
/// receiver topic, so each direction is its own kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
	Approval,
	TransferFrom,
	TransferTo,
	Deposit,
	Withdrawal,
}

impl EventKind {
	/// Event signature hashed into topic0.
	pub fn signature(&self) -> H256 {
		let signature: &[u8] = match self {
			EventKind::Approval => b"Approval(address,address,uint256)",
			EventKind::TransferFrom | EventKind::TransferTo => {
				b"Transfer(address,address,uint256)"
			}
			EventKind::Deposit => b"Deposit(address,uint256)",
			EventKind::Withdrawal => b"Withdrawal(address,uint256)",
		};
		H256::from(keccak256(signature))
	}

	/// Indexed topic position holding the address this kind filters on.
	///
	/// Approvals are filtered on the spender, which sits after the owner.
	pub fn address_topic(&self) -> usize {
		match self {
			EventKind::Approval | EventKind::TransferTo => 2,
			EventKind::TransferFrom | EventKind::Deposit | EventKind::Withdrawal => 1,
		}
	}
}

/// A single log query: one event kind on one contract, matching any of `addresses`
/// at the kind's address topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescriptor {
	pub kind: EventKind,
	pub contract: Address,
	pub addresses: Vec<Address>,
}

impl FilterDescriptor {
	pub fn new(kind: EventKind, contract: Address, addresses: Vec<Address>) -> Self {
		Self {
			kind,
			contract,
			addresses,
		}
	}

	/// Build the `eth_getLogs` filter for the inclusive block range `[from, to]`.
	pub fn to_filter(&self, from: u64, to: u64) -> Filter {
		let mut filter = Filter::new()
			.address(self.contract)
			.from_block(from)
			.to_block(to);
		filter.topics[0] = Some(ValueOrArray::Value(Some(self.kind.signature())));
		filter.topics[self.kind.address_topic()] = Some(ValueOrArray::Array(
			self.addresses
				.iter()
				.map(|address| Some(H256::from(*address)))
				.collect(),
		));
		filter
	}
}

/// Decoded token contract events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
	Approval {
		owner: Address,
		spender: Address,
		value: U256,
		block: u64,
	},
	Transfer {
		from: Address,
		to: Address,
		value: U256,
		block: u64,
	},
	Deposit {
		to: Address,
		value: U256,
		block: u64,
	},
	Withdrawal {
		from: Address,
		value: U256,
		block: u64,
	},
}

impl TokenEvent {
	/// Block number the event was emitted in.
	pub fn block(&self) -> u64 {
		match self {
			TokenEvent::Approval { block, .. }
			| TokenEvent::Transfer { block, .. }
			| TokenEvent::Deposit { block, .. }
			| TokenEvent::Withdrawal { block, .. } => *block,
		}
	}

	/// Addresses whose token balance this event can change.
	///
	/// An approval changes no balance, but its owner is reported so that new approvers get a
	/// balance record in the same chunk that first sees them.
	pub fn touched_addresses(&self) -> Vec<Address> {
		match self {
			TokenEvent::Approval { owner, .. } => vec![*owner],
			TokenEvent::Transfer { from, to, .. } => vec![*from, *to],
			TokenEvent::Deposit { to, .. } => vec![*to],
			TokenEvent::Withdrawal { from, .. } => vec![*from],
		}
	}

	/// Decode a raw log emitted by the token contract.
	pub fn decode(log: &Log) -> Result<Self, LedgerError> {
		let block = log
			.block_number
			.ok_or_else(|| LedgerError::Decode("log without block number".to_string()))?
			.as_u64();
		let topic0 = *log
			.topics
			.first()
			.ok_or_else(|| LedgerError::Decode("log without topics".to_string()))?;
		let topic = |index: usize| -> Result<Address, LedgerError> {
			log.topics.get(index).map(|t| Address::from(*t)).ok_or_else(|| {
				LedgerError::Decode(format!("log at block {} is missing topic {}", block, index))
			})
		};
		if log.data.len() < 32 {
			return Err(LedgerError::Decode(format!(
				"log at block {} carries {} data bytes, expected 32",
				block,
				log.data.len()
			)));
		}
		let value = U256::from_big_endian(&log.data[..32]);

		if topic0 == EventKind::Approval.signature() {
			Ok(TokenEvent::Approval {
				owner: topic(1)?,
				spender: topic(2)?,
				value,
				block,
			})
		} else if topic0 == EventKind::TransferFrom.signature() {
			Ok(TokenEvent::Transfer {
				from: topic(1)?,
				to: topic(2)?,
				value,
				block,
			})
		} else if topic0 == EventKind::Deposit.signature() {
			Ok(TokenEvent::Deposit {
				to: topic(1)?,
				value,
				block,
			})
		} else if topic0 == EventKind::Withdrawal.signature() {
			Ok(TokenEvent::Withdrawal {
				from: topic(1)?,
				value,
				block,
			})
		} else {
			Err(LedgerError::Decode(format!(
				"unknown event signature {:?} at block {}",
				topic0, block
			)))
		}
	}
}

/// Error types for ledger RPC operations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error("Provider error: {0}")]
	ProviderError(#[from] ProviderError),

	#[error("{method} timed out after {after:?}")]
	Timeout { method: &'static str, after: Duration },

	#[error("Decode error: {0}")]
	Decode(String),
}

#[cfg(test)]
mod tests {
	use super::*;
	use ethers::types::{Bytes, U64};

	fn word(value: u64) -> Bytes {
		let mut data = [0u8; 32];
		U256::from(value).to_big_endian(&mut data);
		Bytes::from(data.to_vec())
	}

	fn log(topics: Vec<H256>, data: Bytes, block: Option<u64>) -> Log {
		Log {
			topics,
			data,
			block_number: block.map(U64::from),
			..Default::default()
		}
	}

	#[test]
	fn test_transfer_signature_matches_erc20() {
		assert_eq!(
			format!("{:?}", EventKind::TransferFrom.signature()),
			"0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
		);
		assert_eq!(
			EventKind::TransferFrom.signature(),
			EventKind::TransferTo.signature()
		);
	}

	#[test]
	fn test_decode_transfer() {
		let from = Address::repeat_byte(0xaa);
		let to = Address::repeat_byte(0xbb);
		let raw = log(
			vec![
				EventKind::TransferFrom.signature(),
				H256::from(from),
				H256::from(to),
			],
			word(42),
			Some(104),
		);
		assert_eq!(
			TokenEvent::decode(&raw).unwrap(),
			TokenEvent::Transfer {
				from,
				to,
				value: U256::from(42),
				block: 104
			}
		);
	}

	#[test]
	fn test_decode_deposit_and_withdrawal() {
		let who = Address::repeat_byte(0x11);
		let deposit = log(
			vec![EventKind::Deposit.signature(), H256::from(who)],
			word(7),
			Some(5),
		);
		let withdrawal = log(
			vec![EventKind::Withdrawal.signature(), H256::from(who)],
			word(3),
			Some(6),
		);
		assert_eq!(
			TokenEvent::decode(&deposit).unwrap().touched_addresses(),
			vec![who]
		);
		assert_eq!(TokenEvent::decode(&withdrawal).unwrap().block(), 6);
	}

	#[test]
	fn test_decode_rejects_malformed_logs() {
		let who = H256::from(Address::repeat_byte(0x11));
		let missing_block = log(vec![EventKind::Deposit.signature(), who], word(1), None);
		assert!(matches!(
			TokenEvent::decode(&missing_block),
			Err(LedgerError::Decode(_))
		));

		let unknown = log(vec![H256::repeat_byte(0x01), who], word(1), Some(1));
		assert!(TokenEvent::decode(&unknown).is_err());

		let short_data = log(
			vec![EventKind::Deposit.signature(), who],
			Bytes::from(vec![0u8; 4]),
			Some(1),
		);
		assert!(TokenEvent::decode(&short_data).is_err());

		let missing_topic = log(vec![EventKind::TransferFrom.signature(), who], word(1), Some(1));
		assert!(TokenEvent::decode(&missing_topic).is_err());
	}

	#[test]
	fn test_filter_places_addresses_at_kind_topic() {
		let token = Address::repeat_byte(0x01);
		let holder = Address::repeat_byte(0x02);
		let descriptor = FilterDescriptor::new(EventKind::TransferTo, token, vec![holder]);
		let filter = descriptor.to_filter(10, 20);

		assert_eq!(
			filter.topics[0],
			Some(ValueOrArray::Value(Some(EventKind::TransferTo.signature())))
		);
		assert_eq!(filter.topics[1], None);
		assert_eq!(
			filter.topics[2],
			Some(ValueOrArray::Array(vec![Some(H256::from(holder))]))
		);
		assert_eq!(filter.get_from_block(), Some(U64::from(10)));
		assert_eq!(filter.get_to_block(), Some(U64::from(20)));
	}
}
