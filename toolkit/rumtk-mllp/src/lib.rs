/*
 * rumtk attempts to implement HL7 and medical protocols for interoperability in medicine.
 * This toolkit aims to be reliable, simple, performant, and standards compliant.
 * Copyright (C) 2025  Luis M. Santos, M.D.
 *
 * This library is free software; you can redistribute it and/or
 * modify it under the terms of the GNU Lesser General Public
 * License as published by the Free Software Foundation; either
 * version 2.1 of the License, or (at your option) any later version.
 *
 * This library is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
 * Lesser General Public License for more details.
 *
 * You should have received a copy of the GNU Lesser General Public
 * License along with this library; if not, write to the Free Software
 * Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA  02110-1301  USA
 */

///
/// # Minimal Lower Layer Protocol (MLLP)
///
/// MLLP frames a single HL7 payload between a start-of-block byte and an
/// end-of-block/carriage-return pair:
///
/// ```text
/// <SB> segment\rsegment\r...segment\r <EB><CR>
/// ```
///
/// This crate only implements the framing. It has no notion of HL7 field
/// structure (that lives in `rumtk-hl7-v2`) and no notion of sockets (that
/// lives in the binary that owns the TCP connection) — a block decodes to a
/// plain `Vec<String>` of `\r`-delimited segments, and nothing more.
///
pub mod mllp {
    use std::str::Utf8Error;
    use thiserror::Error;

    /// Marks the start of an MLLP block.
    pub const START_OF_BLOCK: u8 = 0x0b;
    /// Marks the end of an MLLP block, immediately followed by [CARRIAGE_RETURN].
    pub const END_OF_BLOCK: u8 = 0x1c;
    /// Trailer byte required after [END_OF_BLOCK].
    pub const CARRIAGE_RETURN: u8 = 0x0d;
    /// HL7 segment separator used inside a block.
    pub const SEGMENT_SEPARATOR: u8 = b'\r';

    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum MllpError {
        #[error("buffer does not start with an MLLP start-of-block marker")]
        MissingStartOfBlock,
        #[error("buffer is missing the MLLP end-of-block/carriage-return trailer")]
        MissingTrailer,
        #[error("buffer contains no segments between the MLLP framing markers")]
        EmptyBlock,
        #[error("block payload is not valid UTF-8: {0}")]
        InvalidEncoding(#[from] Utf8Error),
    }

    ///
    /// Decodes one complete MLLP block into its constituent `\r`-delimited
    /// segments. `buffer` must start with [START_OF_BLOCK] and end with
    /// [END_OF_BLOCK] followed by [CARRIAGE_RETURN] — a partially received
    /// block is a [MllpError::MissingTrailer], not a panic.
    ///
    pub fn mllp_decode(buffer: &[u8]) -> Result<Vec<String>, MllpError> {
        if buffer.first() != Some(&START_OF_BLOCK) {
            return Err(MllpError::MissingStartOfBlock);
        }
        if buffer.len() < 3
            || buffer[buffer.len() - 2] != END_OF_BLOCK
            || buffer[buffer.len() - 1] != CARRIAGE_RETURN
        {
            return Err(MllpError::MissingTrailer);
        }

        let payload = &buffer[1..buffer.len() - 2];
        let text = std::str::from_utf8(payload)?;
        let mut segments: Vec<String> = text.split(SEGMENT_SEPARATOR as char).map(String::from).collect();

        // The final `\r` before the end-of-block marker is a terminator, not a
        // segment of its own — drop the single empty element it produces, but
        // leave any other (interior) empty segment alone.
        if segments.last().is_some_and(|segment| segment.is_empty()) {
            segments.pop();
        }

        if segments.is_empty() {
            return Err(MllpError::EmptyBlock);
        }

        Ok(segments)
    }

    ///
    /// Encodes a sequence of HL7 segments into a single MLLP block, ready to
    /// be written to a socket.
    ///
    pub fn mllp_encode<S: AsRef<str>>(segments: &[S]) -> Vec<u8> {
        let mut block = Vec::with_capacity(segments.iter().map(|s| s.as_ref().len() + 1).sum::<usize>() + 3);
        block.push(START_OF_BLOCK);
        for segment in segments {
            block.extend_from_slice(segment.as_ref().as_bytes());
            block.push(SEGMENT_SEPARATOR);
        }
        block.push(END_OF_BLOCK);
        block.push(CARRIAGE_RETURN);
        block
    }

    ///
    /// Incrementally assembles MLLP blocks out of an arbitrary stream of
    /// `recv()` calls. A single read from a TCP socket is not guaranteed to
    /// deliver exactly one block — it may deliver a partial block, several
    /// blocks back to back, or stray bytes ahead of the first
    /// [START_OF_BLOCK]. Callers push whatever bytes they read and drain
    /// however many complete frames are now available.
    ///
    #[derive(Debug, Default)]
    pub struct MllpFrameBuffer {
        buffer: Vec<u8>,
    }

    impl MllpFrameBuffer {
        pub fn new() -> Self {
            Self { buffer: Vec::new() }
        }

        /// Appends freshly read bytes to the buffer.
        pub fn push(&mut self, bytes: &[u8]) {
            self.buffer.extend_from_slice(bytes);
        }

        ///
        /// Pops the next complete frame out of the buffer, if one has
        /// arrived. Bytes preceding the first [START_OF_BLOCK] are discarded
        /// per the protocol's "ignore until start of block" rule. Returns
        /// `None` when the buffer holds no complete block yet; returns
        /// `Some(Err(_))` only for a malformed block that *is* fully framed
        /// (e.g. non-UTF8 payload), never for a block still in flight.
        ///
        pub fn next_frame(&mut self) -> Option<Result<Vec<String>, MllpError>> {
            let start = self.buffer.iter().position(|b| *b == START_OF_BLOCK)?;
            if start > 0 {
                self.buffer.drain(0..start);
            }

            let end = self
                .buffer
                .windows(2)
                .position(|w| w[0] == END_OF_BLOCK && w[1] == CARRIAGE_RETURN)?;
            let frame_len = end + 2;
            let frame: Vec<u8> = self.buffer.drain(0..frame_len).collect();
            Some(mllp_decode(&frame))
        }

        /// True when no bytes are buffered at all.
        pub fn is_empty(&self) -> bool {
            self.buffer.is_empty()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn round_trips_a_single_segment_message() {
            let segments = vec!["MSH|^~\\&|SIMULATOR".to_string(), "PID|||497030".to_string()];
            let encoded = mllp_encode(&segments);
            let decoded = mllp_decode(&encoded).expect("well-formed block should decode");
            assert_eq!(decoded, segments);
        }

        #[test]
        fn round_trips_a_message_with_an_interior_empty_segment() {
            let segments = vec!["MSH|1".to_string(), "".to_string(), "PID|2".to_string()];
            let encoded = mllp_encode(&segments);
            let decoded = mllp_decode(&encoded).expect("well-formed block should decode");
            assert_eq!(decoded, segments);
        }

        #[test]
        fn rejects_a_block_missing_the_start_marker() {
            let buffer = [b'M', b'S', b'H', END_OF_BLOCK, CARRIAGE_RETURN];
            assert_eq!(mllp_decode(&buffer), Err(MllpError::MissingStartOfBlock));
        }

        #[test]
        fn rejects_a_truncated_block() {
            let mut buffer = vec![START_OF_BLOCK];
            buffer.extend_from_slice(b"MSH|^~\\&\r");
            assert_eq!(mllp_decode(&buffer), Err(MllpError::MissingTrailer));
        }

        #[test]
        fn frame_buffer_assembles_a_block_delivered_across_two_reads() {
            let mut framer = MllpFrameBuffer::new();
            let whole = mllp_encode(&["MSH|^~\\&|SIMULATOR".to_string()]);
            let (first_half, second_half) = whole.split_at(4);

            framer.push(first_half);
            assert!(framer.next_frame().is_none());

            framer.push(second_half);
            let frame = framer.next_frame().expect("frame should now be complete").unwrap();
            assert_eq!(frame, vec!["MSH|^~\\&|SIMULATOR".to_string()]);
            assert!(framer.is_empty());
        }

        #[test]
        fn frame_buffer_discards_garbage_ahead_of_the_start_marker() {
            let mut framer = MllpFrameBuffer::new();
            let mut noisy = vec![0xff, 0x00];
            noisy.extend_from_slice(&mllp_encode(&["PID|||497030".to_string()]));
            framer.push(&noisy);

            let frame = framer.next_frame().expect("frame present after garbage").unwrap();
            assert_eq!(frame, vec!["PID|||497030".to_string()]);
        }

        #[test]
        fn frame_buffer_splits_two_back_to_back_blocks() {
            let mut framer = MllpFrameBuffer::new();
            let mut both = mllp_encode(&["MSH|1".to_string()]);
            both.extend_from_slice(&mllp_encode(&["MSH|2".to_string()]));
            framer.push(&both);

            let first = framer.next_frame().unwrap().unwrap();
            let second = framer.next_frame().unwrap().unwrap();
            assert_eq!(first, vec!["MSH|1".to_string()]);
            assert_eq!(second, vec!["MSH|2".to_string()]);
            assert!(framer.is_empty());
        }
    }
}
