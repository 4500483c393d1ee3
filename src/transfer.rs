//! Stop-to-stop walking transfers.
//!
//! Transfers are collected first and then indexed once by origin and destination stop. Querying
//! the index before it is built, or building it twice, is a programmer error reported through
//! [`TransferIndexError`].

use crate::network::{Cost, StopIndex, Timestamp};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub from_stop: StopIndex,
    pub to_stop: StopIndex,
    pub duration: Timestamp,
    pub c1: Cost,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferIndexError {
    #[error("Transfer index queried before it was indexed.")]
    NotIndexed,
    #[error("Transfer index is already indexed.")]
    AlreadyIndexed,
}

/// Decides which transfers end up in the index. This is where flex-aware routing plugs in its
/// own rules instead of maintaining a second index type.
pub trait TransferFilter: Send + Sync {
    fn include(&self, transfer: &Transfer) -> bool;
}

impl<F> TransferFilter for F
where
    F: Fn(&Transfer) -> bool + Send + Sync,
{
    fn include(&self, transfer: &Transfer) -> bool { self(transfer) }
}

struct Indexed {
    from_stop: Vec<Vec<Transfer>>,
    to_stop: Vec<Vec<Transfer>>,
}

pub struct TransferIndex {
    num_stops: usize,
    transfers: Vec<Transfer>,
    filter: Option<Box<dyn TransferFilter>>,
    index: Option<Indexed>,
}

impl TransferIndex {
    pub fn new(num_stops: usize, transfers: Vec<Transfer>) -> Self {
        Self {
            num_stops,
            transfers,
            filter: None,
            index: None,
        }
    }

    pub fn with_filter(mut self, filter: Box<dyn TransferFilter>) -> Self {
        self.filter = Some(filter);
        self.index = None;
        self
    }

    /// Adding transfers invalidates an existing index.
    pub fn add_transfers(&mut self, transfers: impl IntoIterator<Item = Transfer>) {
        self.transfers.extend(transfers);
        self.index = None;
    }

    pub fn len(&self) -> usize { self.transfers.len() }

    pub fn is_empty(&self) -> bool { self.transfers.is_empty() }

    pub fn is_indexed(&self) -> bool { self.index.is_some() }

    pub fn index(&mut self) -> Result<(), TransferIndexError> {
        if self.index.is_some() {
            return Err(TransferIndexError::AlreadyIndexed);
        }

        let mut from_stop = vec![Vec::new(); self.num_stops];
        let mut to_stop = vec![Vec::new(); self.num_stops];
        for transfer in &self.transfers {
            if transfer.from_stop == transfer.to_stop {
                continue;
            }
            if self.filter.as_ref().is_some_and(|filter| !filter.include(transfer)) {
                continue;
            }
            from_stop[transfer.from_stop as usize].push(transfer.clone());
            to_stop[transfer.to_stop as usize].push(transfer.clone());
        }

        log::debug!("Indexed {} transfers between {} stops.", self.transfers.len(), self.num_stops);
        self.index = Some(Indexed { from_stop, to_stop });
        Ok(())
    }

    pub fn transfers_from(&self, stop: StopIndex) -> Result<&[Transfer], TransferIndexError> {
        let index = self.index.as_ref().ok_or(TransferIndexError::NotIndexed)?;
        Ok(index.from_stop.get(stop as usize).map(Vec::as_slice).unwrap_or(&[]))
    }

    pub fn transfers_to(&self, stop: StopIndex) -> Result<&[Transfer], TransferIndexError> {
        let index = self.index.as_ref().ok_or(TransferIndexError::NotIndexed)?;
        Ok(index.to_stop.get(stop as usize).map(Vec::as_slice).unwrap_or(&[]))
    }
}
