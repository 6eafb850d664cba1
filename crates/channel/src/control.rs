use crate::codec::{ByteOrder, Codec, Value};
use crate::codes::ResultCodes;
use crate::error::ChannelError;
use crate::ops::{OpKind, OpTable};
use crate::region::{Cell, IoRegion, OpRegion, RESULT_PENDING};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything both ends agree on after the handshake.
#[derive(Debug, Clone)]
pub struct ControlChannel {
    op: Arc<OpRegion>,
    codec: Codec,
    ops: OpTable,
    codes: ResultCodes,
}

impl ControlChannel {
    /// Validates the handshake tables and binds them to the shared regions.
    ///
    /// # Errors
    /// [`ChannelError::Handshake`] for an incomplete op map or result-code table, or a
    /// codec region too small to carry a single argument.
    pub fn new(
        op: Arc<OpRegion>,
        io: Arc<IoRegion>,
        order: ByteOrder,
        op_ids: &BTreeMap<String, i32>,
        codes: &BTreeMap<String, i32>,
    ) -> Result<Self, ChannelError> {
        if io.s11n_size() < 16 {
            return Err(ChannelError::handshake(format!(
                "codec region of {} bytes is too small",
                io.s11n_size()
            )));
        }
        Ok(Self {
            op,
            codec: Codec::new(io, order),
            ops: OpTable::from_ids(op_ids)?,
            codes: ResultCodes::from_table(codes)?,
        })
    }

    #[must_use]
    pub const fn op_region(&self) -> &Arc<OpRegion> {
        &self.op
    }

    #[must_use]
    pub const fn io_region(&self) -> &Arc<IoRegion> {
        self.codec.region()
    }

    #[must_use]
    pub const fn codec(&self) -> &Codec {
        &self.codec
    }

    #[must_use]
    pub const fn ops(&self) -> &OpTable {
        &self.ops
    }

    #[must_use]
    pub const fn codes(&self) -> &ResultCodes {
        &self.codes
    }

    /// Proxy side: publishes `rc` and wakes the caller.
    pub fn complete(&self, rc: i32) {
        self.op.store(Cell::Result, rc);
        self.op.notify(Cell::Result);
    }

    /// Caller side: arms the result cell, writes the arguments and rings the op slot.
    ///
    /// # Errors
    /// [`ChannelError::Overflow`] when the arguments do not fit; nothing is posted then.
    pub fn post(&self, kind: OpKind, args: &[Value]) -> Result<(), ChannelError> {
        self.codec.serialize(args)?;
        self.op.store(Cell::Result, RESULT_PENDING);
        self.op.store(Cell::Op, self.ops.code(kind));
        self.op.notify(Cell::Op);
        Ok(())
    }
}
