//! Tagged binary segments.
//!
//! A stream is a sequence of self-describing segments:
//!
//! ```text
//! [u32 length][32B object name][32B type name][u32 type code][u32 count]
//! [8B pad][payload...][pad to the 16-byte alignment unit]
//! ```
//!
//! The length word counts every byte after itself; the header it prefixes is
//! always 80 bytes, and each segment's total size is a multiple of the
//! alignment unit. The type code packs the element flags in the low 16 bits
//! and the element byte size in the high 16.
//! Array payloads are preceded by height/width/stride/flags words and honor
//! interior row padding (`stride = round_up(width * elem, 16)`); slice
//! payloads are preceded by six i32 sub-sequence descriptors. Unreasonable
//! headers are decode failures, never panics.

use crate::wire::{WireReader, WireWriter};
use crate::{Error, Result};
use log::warn;

pub const MEMORY_ALIGNMENT: usize = 16;
pub const NAME_LEN: usize = 32;

/// Header bytes following the length word, padding included.
const HEADER_LEN: usize = NAME_LEN + NAME_LEN + 4 + 4 + 8;

pub const FLAG_BASIC: u32 = 0x1;
pub const FLAG_INTEGER: u32 = 0x2;
pub const FLAG_SIGNED: u32 = 0x4;
pub const FLAG_FLOAT: u32 = 0x8;
pub const FLAG_STRING: u32 = 0x10;

const MAX_ELEM_SIZE: u32 = 10_000;
const MAX_COUNT: u32 = 2_000_000_000;
const MAX_DIM: u32 = 1_000_000_000;

#[inline]
pub fn round_up(n: usize, alignment: usize) -> usize {
    n.div_ceil(alignment) * alignment
}

/// Element types the codec can carry.
pub trait Scalar: Copy + Default {
    const TYPE_FLAGS: u32;
    const BYTE_SIZE: usize;
    const TYPE_NAME: &'static str;

    fn write(self, w: &mut WireWriter);
    fn read(r: &mut WireReader<'_>) -> Result<Self>;
}

macro_rules! impl_scalar {
    ($ty:ty, $flags:expr, $size:expr, $name:literal, $write:ident, $read:ident) => {
        impl Scalar for $ty {
            const TYPE_FLAGS: u32 = $flags;
            const BYTE_SIZE: usize = $size;
            const TYPE_NAME: &'static str = $name;

            fn write(self, w: &mut WireWriter) {
                w.$write(self);
            }

            fn read(r: &mut WireReader<'_>) -> Result<Self> {
                r.$read()
            }
        }
    };
}

impl_scalar!(u8, FLAG_BASIC | FLAG_INTEGER, 1, "u8", write_u8, read_u8);
impl_scalar!(
    i16,
    FLAG_BASIC | FLAG_INTEGER | FLAG_SIGNED,
    2,
    "i16",
    write_i16,
    read_i16
);
impl_scalar!(u32, FLAG_BASIC | FLAG_INTEGER, 4, "u32", write_u32, read_u32);
impl_scalar!(
    i32,
    FLAG_BASIC | FLAG_INTEGER | FLAG_SIGNED,
    4,
    "i32",
    write_i32,
    read_i32
);
impl_scalar!(
    f32,
    FLAG_BASIC | FLAG_FLOAT | FLAG_SIGNED,
    4,
    "f32",
    write_f32,
    read_f32
);

#[inline]
fn type_code<T: Scalar>() -> u32 {
    T::TYPE_FLAGS | (T::BYTE_SIZE as u32) << 16
}

/// Dense 2-D element array. Stored unpadded in memory; the wire form pads
/// each row to `stride_bytes`.
#[derive(Clone, Debug, PartialEq)]
pub struct DataArray<T> {
    pub height: usize,
    pub width: usize,
    pub data: Vec<T>,
}

impl<T: Scalar> DataArray<T> {
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            data: vec![T::default(); height * width],
        }
    }

    pub fn from_vec(height: usize, width: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != height * width {
            return Err(Error::Corrupted(format!(
                "array data length {} does not match {}x{}",
                data.len(),
                height,
                width
            )));
        }
        Ok(Self {
            height,
            width,
            data,
        })
    }

    #[inline]
    pub fn at(&self, y: usize, x: usize) -> T {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, y: usize, x: usize, v: T) {
        self.data[y * self.width + x] = v;
    }

    /// Wire row pitch: element bytes rounded up to the alignment unit.
    pub fn stride_bytes(&self) -> usize {
        round_up(self.width * T::BYTE_SIZE, MEMORY_ALIGNMENT)
    }
}

/// Sub-sequence descriptor for array slices. Increments may be negative.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SliceSpec {
    pub y_start: i32,
    pub y_increment: i32,
    pub y_size: i32,
    pub x_start: i32,
    pub x_increment: i32,
    pub x_size: i32,
}

/// Append-only segment stream builder.
#[derive(Default)]
pub struct SegmentWriter {
    w: WireWriter,
}

impl SegmentWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.w.as_bytes()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.w.into_bytes()
    }

    pub fn write_to_file(&self, path: &std::path::Path) -> Result<()> {
        std::fs::write(path, self.w.as_bytes())?;
        Ok(())
    }

    fn begin(&mut self, object_name: &str, type_name: &str, code: u32, count: u32) -> usize {
        let start = self.w.len();
        self.w.write_u32(0); // length, patched by end()
        self.w.write_fixed_str(object_name, NAME_LEN);
        self.w.write_fixed_str(type_name, NAME_LEN);
        self.w.write_u32(code);
        self.w.write_u32(count);
        // Fixed 8-byte pad: the header is HEADER_LEN bytes no matter where
        // the segment sits in the stream.
        self.w.write_bytes(&[0u8; 8]);
        start
    }

    fn end(&mut self, start: usize) {
        // Pad the segment tail so the next one starts on the alignment unit.
        while (self.w.len() - start) % MEMORY_ALIGNMENT != 0 {
            self.w.write_u8(0);
        }
        let length = (self.w.len() - start - 4) as u32;
        self.w.patch_u32(start, length);
    }

    pub fn push_basic<T: Scalar>(&mut self, object_name: &str, value: T) {
        let start = self.begin(object_name, "Basic", type_code::<T>(), 1);
        value.write(&mut self.w);
        self.end(start);
    }

    pub fn push_array<T: Scalar>(&mut self, object_name: &str, arr: &DataArray<T>) {
        let count = (arr.height * arr.width) as u32;
        let start = self.begin(object_name, "Array", type_code::<T>(), count);
        self.w.write_u32(arr.height as u32);
        self.w.write_u32(arr.width as u32);
        self.w.write_u32(arr.stride_bytes() as u32);
        self.w.write_u32(T::TYPE_FLAGS);
        let stride = arr.stride_bytes();
        let row_bytes = arr.width * T::BYTE_SIZE;
        for y in 0..arr.height {
            for x in 0..arr.width {
                arr.at(y, x).write(&mut self.w);
            }
            for _ in row_bytes..stride {
                self.w.write_u8(0);
            }
        }
        self.end(start);
    }

    /// Gather a rectangular sub-sequence of `arr` and append it with its
    /// descriptor. Fails when any addressed element falls outside the array.
    pub fn push_array_slice<T: Scalar>(
        &mut self,
        object_name: &str,
        arr: &DataArray<T>,
        spec: &SliceSpec,
    ) -> Result<()> {
        if spec.y_size < 0 || spec.x_size < 0 {
            return Err(Error::SliceOutOfRange(format!(
                "negative slice size {}x{}",
                spec.y_size, spec.x_size
            )));
        }
        let mut gathered = Vec::with_capacity((spec.y_size * spec.x_size) as usize);
        for j in 0..spec.y_size {
            let y = spec.y_start + j * spec.y_increment;
            for i in 0..spec.x_size {
                let x = spec.x_start + i * spec.x_increment;
                if y < 0 || x < 0 || y as usize >= arr.height || x as usize >= arr.width {
                    return Err(Error::SliceOutOfRange(format!(
                        "element ({y},{x}) outside {}x{} array",
                        arr.height, arr.width
                    )));
                }
                gathered.push(arr.at(y as usize, x as usize));
            }
        }

        let start = self.begin(
            object_name,
            "ArraySlice",
            type_code::<T>(),
            gathered.len() as u32,
        );
        self.w.write_i32(spec.y_start);
        self.w.write_i32(spec.y_increment);
        self.w.write_i32(spec.y_size);
        self.w.write_i32(spec.x_start);
        self.w.write_i32(spec.x_increment);
        self.w.write_i32(spec.x_size);
        for v in gathered {
            v.write(&mut self.w);
        }
        self.end(start);
        Ok(())
    }

    pub fn push_string_array(&mut self, object_name: &str, items: &[&str]) {
        let code = FLAG_STRING | 1 << 16;
        let start = self.begin(object_name, "StringArray", code, items.len() as u32);
        for s in items {
            self.w.write_u32(s.len() as u32);
            self.w.write_bytes(s.as_bytes());
        }
        self.end(start);
    }

    /// Append an opaque payload under a caller-chosen type name. Count
    /// records the payload length in bytes.
    pub fn push_raw(&mut self, type_name: &str, object_name: &str, payload: &[u8]) {
        let code = 1 << 16;
        let start = self.begin(object_name, type_name, code, payload.len() as u32);
        self.w.write_bytes(payload);
        self.end(start);
    }
}

/// One decoded segment header with a view of its payload. Trailing
/// alignment padding may follow the logical payload.
#[derive(Clone, Debug)]
pub struct Segment<'a> {
    pub object_name: String,
    pub type_name: String,
    pub type_code: u32,
    pub count: u32,
    pub payload: &'a [u8],
}

impl<'a> Segment<'a> {
    fn check_type<T: Scalar>(&self) -> Result<()> {
        if self.type_code != type_code::<T>() {
            return Err(Error::TypeMismatch {
                expected: T::TYPE_NAME,
                found: self.type_code,
            });
        }
        Ok(())
    }

    pub fn parse_basic<T: Scalar>(&self) -> Result<T> {
        self.check_type::<T>()?;
        if self.count != 1 {
            return Err(Error::Corrupted(format!(
                "basic segment with count {}",
                self.count
            )));
        }
        T::read(&mut WireReader::new(self.payload))
    }

    pub fn parse_array<T: Scalar>(&self) -> Result<DataArray<T>> {
        self.check_type::<T>()?;
        let mut r = WireReader::new(self.payload);
        let height = r.read_u32()?;
        let width = r.read_u32()?;
        let stride = r.read_u32()?;
        let flags = r.read_u32()?;

        if height >= MAX_DIM || width >= MAX_DIM {
            return Err(Error::Corrupted(format!(
                "unreasonable array dimensions {height}x{width}"
            )));
        }
        if flags != T::TYPE_FLAGS {
            return Err(Error::Corrupted(format!(
                "array element flags {flags:#x} do not match {}",
                T::TYPE_NAME
            )));
        }
        if width > 0 && stride as usize != round_up(width as usize * T::BYTE_SIZE, MEMORY_ALIGNMENT)
        {
            return Err(Error::Corrupted(format!(
                "array stride {stride} does not match width {width}"
            )));
        }
        if self.count as u64 != height as u64 * width as u64 {
            return Err(Error::Corrupted(format!(
                "array count {} does not match {height}x{width}",
                self.count
            )));
        }

        let mut out = DataArray::<T>::new(height as usize, width as usize);
        let pad = stride as usize - width as usize * T::BYTE_SIZE;
        for y in 0..height as usize {
            for x in 0..width as usize {
                let v = T::read(&mut r)?;
                out.set(y, x, v);
            }
            r.skip(pad)?;
        }
        Ok(out)
    }

    pub fn parse_array_slice<T: Scalar>(&self) -> Result<(SliceSpec, Vec<T>)> {
        self.check_type::<T>()?;
        let mut r = WireReader::new(self.payload);
        let spec = SliceSpec {
            y_start: r.read_i32()?,
            y_increment: r.read_i32()?,
            y_size: r.read_i32()?,
            x_start: r.read_i32()?,
            x_increment: r.read_i32()?,
            x_size: r.read_i32()?,
        };
        if spec.y_size < 0 || spec.x_size < 0 {
            return Err(Error::Corrupted(format!(
                "negative slice size {}x{}",
                spec.y_size, spec.x_size
            )));
        }
        let n = spec.y_size as u64 * spec.x_size as u64;
        if n != self.count as u64 {
            return Err(Error::Corrupted(format!(
                "slice count {} does not match {}x{}",
                self.count, spec.y_size, spec.x_size
            )));
        }
        let mut out = Vec::with_capacity(n as usize);
        for _ in 0..n {
            out.push(T::read(&mut r)?);
        }
        Ok((spec, out))
    }

    pub fn parse_string_array(&self) -> Result<Vec<String>> {
        if self.type_code & FLAG_STRING == 0 {
            return Err(Error::TypeMismatch {
                expected: "string",
                found: self.type_code,
            });
        }
        let mut r = WireReader::new(self.payload);
        let mut out = Vec::with_capacity(self.count as usize);
        for _ in 0..self.count {
            let len = r.read_u32()? as usize;
            if len > r.remaining() {
                return Err(Error::Corrupted(format!(
                    "string length {len} exceeds remaining payload {}",
                    r.remaining()
                )));
            }
            out.push(String::from_utf8_lossy(r.read_bytes(len)?).into_owned());
        }
        Ok(out)
    }
}

fn read_segment<'a>(r: &mut WireReader<'a>) -> Result<Segment<'a>> {
    let length = r.read_u32()? as usize;
    if length < HEADER_LEN {
        return Err(Error::Corrupted(format!(
            "segment length {length} below header size"
        )));
    }
    if length > r.remaining() {
        return Err(Error::Corrupted(format!(
            "segment length {length} exceeds remaining {} bytes",
            r.remaining()
        )));
    }

    let mut seg = WireReader::new(r.read_bytes(length)?);
    let object_name = seg.read_fixed_str(NAME_LEN)?;
    let type_name = seg.read_fixed_str(NAME_LEN)?;
    let type_code = seg.read_u32()?;
    let count = seg.read_u32()?;
    seg.skip(8)?; // header pad to the alignment unit

    let elem = type_code >> 16;
    if elem >= MAX_ELEM_SIZE {
        return Err(Error::Corrupted(format!(
            "unreasonable element size {elem}"
        )));
    }
    if count >= MAX_COUNT {
        return Err(Error::Corrupted(format!("unreasonable count {count}")));
    }

    let payload = seg.read_bytes(seg.remaining())?;
    Ok(Segment {
        object_name,
        type_name,
        type_code,
        count,
        payload,
    })
}

/// Iterator over the segments of a stream.
///
/// A corrupted length word yields one `Err` and then terminates; trailing
/// bytes shorter than a length word are ignored.
pub struct SegmentIter<'a> {
    r: WireReader<'a>,
    done: bool,
}

impl<'a> SegmentIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            r: WireReader::new(buf),
            done: false,
        }
    }

    pub fn has_next(&self) -> bool {
        !self.done && self.r.remaining() >= 4
    }
}

impl<'a> Iterator for SegmentIter<'a> {
    type Item = Result<Segment<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return None;
        }
        match read_segment(&mut self.r) {
            Ok(seg) => Some(Ok(seg)),
            Err(e) => {
                warn!("segment stream corrupted: {e}");
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_segment(bytes: &[u8]) -> Segment<'_> {
        let mut it = SegmentIter::new(bytes);
        let seg = it.next().expect("one segment").expect("decodes");
        assert!(it.next().is_none());
        seg
    }

    #[test]
    fn basic_round_trip() {
        let mut w = SegmentWriter::new();
        w.push_basic("answer", 42i32);
        let bytes = w.into_bytes();

        let seg = single_segment(&bytes);
        assert_eq!(seg.object_name, "answer");
        assert_eq!(seg.type_name, "Basic");
        assert_eq!(seg.parse_basic::<i32>().unwrap(), 42);
    }

    #[test]
    fn basic_type_mismatch_is_detected() {
        let mut w = SegmentWriter::new();
        w.push_basic("pi", 3.25f32);
        let bytes = w.into_bytes();
        let seg = single_segment(&bytes);
        assert!(matches!(
            seg.parse_basic::<i32>(),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn f32_array_round_trip_irregular() {
        // 3x5 floats: row bytes 20, stride 32, so interior padding is real.
        let mut arr = DataArray::<f32>::new(3, 5);
        for y in 0..3 {
            for x in 0..5 {
                arr.set(y, x, (y * 5 + x) as f32 * 0.5 - 2.0);
            }
        }
        assert_eq!(arr.stride_bytes(), 32);

        let mut w = SegmentWriter::new();
        w.push_array("weights", &arr);
        let bytes = w.into_bytes();

        let seg = single_segment(&bytes);
        let back = seg.parse_array::<f32>().unwrap();
        assert_eq!(back, arr);
    }

    #[test]
    fn empty_and_single_element_arrays_round_trip() {
        for (h, wd) in [(0usize, 0usize), (1, 1)] {
            let arr = DataArray::<f32>::new(h, wd);
            let mut w = SegmentWriter::new();
            w.push_array("a", &arr);
            let bytes = w.into_bytes();
            let back = single_segment(&bytes).parse_array::<f32>().unwrap();
            assert_eq!(back.height, h);
            assert_eq!(back.width, wd);
        }
    }

    #[test]
    fn string_array_round_trip() {
        let mut w = SegmentWriter::new();
        w.push_string_array("names", &["MARKER_BULLSEYE_000", "", "gears"]);
        let bytes = w.into_bytes();
        let back = single_segment(&bytes).parse_string_array().unwrap();
        assert_eq!(back, vec!["MARKER_BULLSEYE_000", "", "gears"]);
    }

    #[test]
    fn array_slice_round_trip_with_negative_increment() {
        let mut arr = DataArray::<i32>::new(4, 4);
        for y in 0..4 {
            for x in 0..4 {
                arr.set(y, x, (y * 4 + x) as i32);
            }
        }
        let spec = SliceSpec {
            y_start: 3,
            y_increment: -1,
            y_size: 2,
            x_start: 0,
            x_increment: 2,
            x_size: 2,
        };
        let mut w = SegmentWriter::new();
        w.push_array_slice("rev", &arr, &spec).unwrap();
        let bytes = w.into_bytes();

        let (back_spec, vals) = single_segment(&bytes).parse_array_slice::<i32>().unwrap();
        assert_eq!(back_spec, spec);
        assert_eq!(vals, vec![12, 14, 8, 10]);
    }

    #[test]
    fn out_of_range_slice_is_rejected_at_write() {
        let arr = DataArray::<i32>::new(2, 2);
        let spec = SliceSpec {
            y_start: 0,
            y_increment: 1,
            y_size: 3,
            x_start: 0,
            x_increment: 1,
            x_size: 1,
        };
        let mut w = SegmentWriter::new();
        assert!(matches!(
            w.push_array_slice("bad", &arr, &spec),
            Err(Error::SliceOutOfRange(_))
        ));
    }

    #[test]
    fn multiple_segments_iterate_in_order() {
        let mut w = SegmentWriter::new();
        w.push_basic("a", 1i32);
        w.push_basic("b", 2.0f32);
        w.push_string_array("c", &["x"]);
        let bytes = w.into_bytes();

        let names: Vec<String> = SegmentIter::new(&bytes)
            .map(|s| s.unwrap().object_name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn header_stays_fixed_across_uneven_segments() {
        // Odd-length payloads must not shift where later headers or
        // payloads begin: every header is HEADER_LEN bytes and every
        // segment ends on the alignment unit.
        let mut w = SegmentWriter::new();
        w.push_raw("Blob", "odd", &[0xAA, 0xBB, 0xCC]);
        w.push_basic("after", 7i32);
        w.push_raw("Blob", "odd2", &[0x01]);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len() % MEMORY_ALIGNMENT, 0);

        let mut it = SegmentIter::new(&bytes);
        let first = it.next().unwrap().unwrap();
        assert_eq!(first.object_name, "odd");
        assert_eq!(&first.payload[..3], &[0xAA, 0xBB, 0xCC]);

        let second = it.next().unwrap().unwrap();
        assert_eq!(second.object_name, "after");
        assert_eq!(second.parse_basic::<i32>().unwrap(), 7);

        let third = it.next().unwrap().unwrap();
        assert_eq!(third.object_name, "odd2");
        assert_eq!(third.payload[0], 0x01);
        assert!(it.next().is_none());
    }

    #[test]
    fn corrupted_length_terminates_with_error() {
        let mut w = SegmentWriter::new();
        w.push_basic("a", 1i32);
        let mut bytes = w.into_bytes();
        // Inflate the length word past the end of the buffer.
        bytes[0..4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());

        let mut it = SegmentIter::new(&bytes);
        assert!(matches!(it.next(), Some(Err(Error::Corrupted(_)))));
        assert!(it.next().is_none());
    }

    #[test]
    fn tampered_stride_is_a_decode_failure() {
        let arr = DataArray::<f32>::new(2, 3);
        let mut w = SegmentWriter::new();
        w.push_array("a", &arr);
        let mut bytes = w.into_bytes();
        // Stride word sits at payload offset 8; payload starts after the
        // 4-byte length and 80-byte header.
        let stride_at = 4 + 80 + 8;
        bytes[stride_at..stride_at + 4].copy_from_slice(&13u32.to_le_bytes());

        let seg = single_segment(&bytes);
        assert!(matches!(seg.parse_array::<f32>(), Err(Error::Corrupted(_))));
    }

    #[test]
    fn raw_segment_round_trip() {
        let payload = [1u8, 2, 3, 4, 5];
        let mut w = SegmentWriter::new();
        w.push_raw("VisionMarker", "m0", &payload);
        let bytes = w.into_bytes();

        let seg = single_segment(&bytes);
        assert_eq!(seg.type_name, "VisionMarker");
        assert_eq!(seg.count, 5);
        assert_eq!(&seg.payload[..5], &payload);
    }
}
