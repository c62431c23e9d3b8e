// Copyright 2024-2026 The Varve Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Lazily materialised frame slices.
//!
//! A segment is one commit row turned into a readable frame: per-column
//! content digests plus a declared `[start, stop]` range and closure tag.
//! Column payloads are only fetched from the pod (or taken from the commit's
//! embedded payloads) on first materialisation, then the frame is memoised.

use std::sync::OnceLock;

use crate::codec;
use crate::error::StoreResult;
use crate::frame::Closed;
use crate::frame::Frame;
use crate::frame::Value;
use crate::hex_util;
use crate::object_id::Digest;
use crate::pod::Pod as _;
use crate::pod::ScopedPod;
use crate::schema::Schema;

pub struct Segment {
    schema: Schema,
    pod: ScopedPod,
    digests: Vec<Digest>,
    // Payloads embedded in the commit, short-circuiting the pod read.
    payloads: Vec<Option<Vec<u8>>>,
    start: Vec<Value>,
    stop: Vec<Value>,
    closed: Closed,
    frame: OnceLock<Frame>,
}

impl Segment {
    pub(crate) fn new(
        schema: Schema,
        pod: ScopedPod,
        digests: Vec<Digest>,
        payloads: Vec<Option<Vec<u8>>>,
        start: Vec<Value>,
        stop: Vec<Value>,
        closed: Closed,
    ) -> Self {
        Self {
            schema,
            pod,
            digests,
            payloads,
            start,
            stop,
            closed,
            frame: OnceLock::new(),
        }
    }

    pub fn start(&self) -> &[Value] {
        &self.start
    }

    pub fn stop(&self) -> &[Value] {
        &self.stop
    }

    pub fn closed(&self) -> Closed {
        self.closed
    }

    /// Number of rows in the materialised slice.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.frame()?.len())
    }

    /// Resolves, decodes and slices the referenced columns. The result is
    /// memoised; later calls are free.
    pub fn frame(&self) -> StoreResult<&Frame> {
        if let Some(frame) = self.frame.get() {
            return Ok(frame);
        }
        let mut columns = vec![];
        for ((def, digest), payload) in self.schema.columns().zip(&self.digests).zip(&self.payloads)
        {
            let data = match payload {
                Some(embedded) => embedded.clone(),
                None => self.pod.read(&hex_util::hashed_key(&digest.hex()))?,
            };
            columns.push(codec::decode_payload(def.dtype, &def.codec, &data)?);
        }
        let full = Frame::from_ordered_columns(self.schema.clone(), columns);
        let (lo, hi) = full.index_slice(Some(&self.start), Some(&self.stop), self.closed);
        let frame = full.slice(lo, hi);
        Ok(self.frame.get_or_init(|| frame))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::frame::Column;
    use crate::pod::MemoryPod;
    use crate::pod::Pod;

    fn write_blob(pod: &dyn Pod, column: &Column, codec: &str) -> Digest {
        let payload = codec::encode_payload(column, codec).unwrap();
        let digest = Digest::of(&payload);
        pod.write(&hex_util::hashed_key(&digest.hex()), &payload)
            .unwrap();
        digest
    }

    #[test]
    fn test_segment_materialises_and_slices() {
        let schema = Schema::tabular(["ts int64*", "value float64"]).unwrap();
        let pod: Arc<dyn Pod> = Arc::new(MemoryPod::new());
        let scoped = ScopedPod::new(pod.clone(), "");

        let ts = Column::from_iter([1i64, 2, 3, 4, 5]);
        let value = Column::from_iter([10.0, 20.0, 30.0, 40.0, 50.0]);
        let digests = vec![
            write_blob(pod.as_ref(), &ts, "zstd"),
            write_blob(pod.as_ref(), &value, "zstd"),
        ];

        let segment = Segment::new(
            schema,
            scoped,
            digests,
            vec![None, None],
            vec![Value::Int(2)],
            vec![Value::Int(4)],
            Closed::Left,
        );
        let frame = segment.frame().unwrap();
        assert_eq!(frame.column("ts").unwrap(), &Column::from_iter([2i64, 3]));
        assert_eq!(
            frame.column("value").unwrap(),
            &Column::from_iter([20.0, 30.0])
        );
        assert_eq!(segment.len().unwrap(), 2);
    }

    #[test]
    fn test_segment_prefers_embedded_payload() {
        let schema = Schema::tabular(["ts int64*", "value float64"]).unwrap();
        let pod: Arc<dyn Pod> = Arc::new(MemoryPod::new());
        let scoped = ScopedPod::new(pod, "");

        let ts = Column::from_iter([7i64, 8]);
        let value = Column::from_iter([70.0, 80.0]);
        let ts_payload = codec::encode_payload(&ts, "zstd").unwrap();
        let value_payload = codec::encode_payload(&value, "zstd").unwrap();
        // Nothing is written to the pod: the payloads ride in the commit
        let segment = Segment::new(
            schema,
            scoped,
            vec![Digest::of(&ts_payload), Digest::of(&value_payload)],
            vec![Some(ts_payload), Some(value_payload)],
            vec![Value::Int(7)],
            vec![Value::Int(8)],
            Closed::Both,
        );
        assert_eq!(
            segment.frame().unwrap().column("ts").unwrap(),
            &Column::from_iter([7i64, 8])
        );
    }
}
