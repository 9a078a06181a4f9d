//! Trade tick file reader.
//!
//! Per-contract files: a 56-byte header (`SCID` magic) followed by
//! fixed-size 40-byte little-endian records. In tick mode each record is
//! one execution: `close` is the trade price, `high`/`low` carry the ask
//! and bid at execution, and the bid/ask volume split attributes the
//! aggressor. One symbol per file, taken from the contract file name.

use crate::contract::ContractId;
use crate::time::sc_us_to_unix_us;
use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tickalign_core::{
    Aggressor, Error, EventSource, MarketEvent, Result, Sequence, TimestampUs, TradeEvent,
};

/// File magic for trade tick files.
pub const TRADE_MAGIC: &[u8; 4] = b"SCID";
/// Header size in bytes.
pub const TRADE_HEADER_SIZE: u64 = 56;
/// Record size in bytes.
pub const TRADE_RECORD_SIZE: u64 = 40;

/// Raw fields of one trade tick record, before tick-mode interpretation.
#[derive(Debug, Clone, Copy)]
struct RawTick {
    sc_us: i64,
    close: f32,
    total_volume: u32,
    bid_volume: u32,
    ask_volume: u32,
}

/// Lazy, forward-only reader over a trade tick file.
///
/// Record sequence numbers are the record index within the file, so a
/// reader resumed from a byte offset continues the same numbering.
#[derive(Debug)]
pub struct TradeReader<R> {
    inner: R,
    symbol: String,
    source_name: String,
    offset: u64,
    last_ts_us: Option<TimestampUs>,
    done: bool,
}

impl TradeReader<BufReader<File>> {
    /// Open a trade file; the symbol comes from the contract file name.
    /// Fails with a format error on bad magic or header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_at(path, TRADE_HEADER_SIZE)
    }

    /// Open a trade file and resume reading from a byte offset previously
    /// returned by [`TradeReader::offset`].
    pub fn open_at(path: impl AsRef<Path>, offset: u64) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::config(format!("bad trade file path: {}", path.display())))?;
        let symbol = ContractId::parse(name)?.code();
        let file = BufReader::new(File::open(path)?);
        Self::from_reader_at(file, symbol, name.to_string(), offset)
    }
}

impl<R: Read + Seek> TradeReader<R> {
    /// Wrap an already-open source (e.g. an in-memory buffer).
    pub fn from_reader(inner: R, symbol: impl Into<String>) -> Result<Self> {
        let symbol = symbol.into();
        let name = symbol.clone();
        Self::from_reader_at(inner, symbol, name, TRADE_HEADER_SIZE)
    }

    fn from_reader_at(
        mut inner: R,
        symbol: String,
        source_name: String,
        offset: u64,
    ) -> Result<Self> {
        validate_header(&mut inner, &source_name)?;
        if offset < TRADE_HEADER_SIZE || (offset - TRADE_HEADER_SIZE) % TRADE_RECORD_SIZE != 0 {
            return Err(Error::config(format!(
                "trade resume offset {offset} is not on a record boundary"
            )));
        }
        inner.seek(SeekFrom::Start(offset))?;
        Ok(Self {
            inner,
            symbol,
            source_name,
            offset,
            last_ts_us: None,
            done: false,
        })
    }

    /// Symbol of every event this reader produces.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Current byte offset, valid for resumption.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Sequence number the next record will carry.
    pub fn next_sequence(&self) -> Sequence {
        (self.offset - TRADE_HEADER_SIZE) / TRADE_RECORD_SIZE
    }

    /// Read the next trade. A truncated trailing record ends the stream
    /// without error; a decodable-but-invalid record yields a
    /// `MalformedRecord` and the stream continues.
    pub fn next_trade(&mut self) -> Option<Result<TradeEvent>> {
        if self.done {
            return None;
        }
        let mut buf = [0u8; TRADE_RECORD_SIZE as usize];
        let n = match read_full(&mut self.inner, &mut buf) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };
        if n == 0 {
            self.done = true;
            return None;
        }
        if n < buf.len() {
            // truncated trailing record: end of stream, not an error
            tracing::debug!(
                source = %self.source_name,
                offset = self.offset,
                got = n,
                "truncated trailing trade record"
            );
            self.done = true;
            return None;
        }

        let record_offset = self.offset;
        let sequence = self.next_sequence();
        self.offset += TRADE_RECORD_SIZE;

        let raw = decode_tick(&buf);
        if !raw.close.is_finite() || raw.close <= 0.0 {
            return Some(Err(Error::malformed(
                record_offset,
                format!("non-positive trade price {}", raw.close),
            )));
        }

        let ts_us = sc_us_to_unix_us(raw.sc_us);
        // backward clock jump = session rollover; flagged, never corrected
        let rollover = self.last_ts_us.is_some_and(|last| ts_us < last);
        self.last_ts_us = Some(ts_us);

        let aggressor = if raw.ask_volume > 0 && raw.bid_volume == 0 {
            Aggressor::Buy
        } else if raw.bid_volume > 0 && raw.ask_volume == 0 {
            Aggressor::Sell
        } else {
            Aggressor::Unknown
        };

        Some(Ok(TradeEvent {
            symbol: self.symbol.clone(),
            ts_us,
            price: raw.close as f64,
            size: raw.total_volume,
            aggressor,
            sequence,
            rollover,
        }))
    }
}

impl<R: Read + Seek> EventSource for TradeReader<R> {
    fn next_event(&mut self) -> Option<Result<MarketEvent>> {
        self.next_trade().map(|r| r.map(MarketEvent::Trade))
    }
}

fn decode_tick(buf: &[u8]) -> RawTick {
    RawTick {
        sc_us: LittleEndian::read_i64(&buf[0..8]),
        // open/high/low occupy bytes 8..20; only close matters in tick mode
        close: LittleEndian::read_f32(&buf[20..24]),
        total_volume: LittleEndian::read_u32(&buf[28..32]),
        bid_volume: LittleEndian::read_u32(&buf[32..36]),
        ask_volume: LittleEndian::read_u32(&buf[36..40]),
    }
}

fn validate_header<R: Read>(inner: &mut R, source_name: &str) -> Result<()> {
    let mut hdr = [0u8; TRADE_HEADER_SIZE as usize];
    inner
        .read_exact(&mut hdr)
        .map_err(|_| Error::format(source_name, "trade header too short"))?;
    if &hdr[0..4] != TRADE_MAGIC {
        return Err(Error::format(source_name, "missing SCID magic"));
    }
    let header_size = LittleEndian::read_u32(&hdr[4..8]) as u64;
    let record_size = LittleEndian::read_u32(&hdr[8..12]) as u64;
    if header_size != TRADE_HEADER_SIZE {
        return Err(Error::format(
            source_name,
            format!("unexpected trade header size {header_size}"),
        ));
    }
    if record_size != TRADE_RECORD_SIZE {
        return Err(Error::format(
            source_name,
            format!("unexpected trade record size {record_size}"),
        ));
    }
    Ok(())
}

/// Read until the buffer is full or EOF; returns bytes read.
pub(crate) fn read_full<R: Read>(inner: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match inner.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
