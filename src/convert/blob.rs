// Legacy binary geometry blob: versioned little-endian layout, 0.1 and 0.2.

use std::collections::HashMap;
use std::fmt;

use bitvec::prelude::*;
use bytes::{Buf, BufMut};

use crate::config::MAX_TEXTURE_CHANNELS;
use crate::error::{FacadeError, FacadeResult};

/// Reserved words written after the curve table in 0.2 blobs.
const V0_2_RESERVED_WORDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobVersion {
    pub major: u16,
    pub minor: u16,
}

impl BlobVersion {
    pub const V0_1: BlobVersion = BlobVersion { major: 0, minor: 1 };
    pub const V0_2: BlobVersion = BlobVersion { major: 0, minor: 2 };

    fn is_supported(&self) -> bool {
        *self == Self::V0_1 || *self == Self::V0_2
    }
}

impl fmt::Display for BlobVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlobPiece {
    pub name: String,
    /// Material-space vertex ids belonging to the piece, sorted.
    pub vertices: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlobCurve {
    pub name: String,
    pub piece_id: u32,
    pub vertices: Vec<u32>,
}

/// Decoded legacy blob, normalized to the 0.2 piece model.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyBlob {
    /// Version found in the file header.
    pub version: BlobVersion,
    pub name: String,
    pub vertices_3d: Vec<[f32; 3]>,
    pub vertices_2d: Option<Vec<[f32; 2]>>,
    pub texture_channels: Vec<Vec<[f32; 2]>>,
    pub faces: Vec<[u32; 3]>,
    pub pieces: Vec<BlobPiece>,
    pub curves: Vec<BlobCurve>,
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn need(&self, bytes: usize, what: &str) -> FacadeResult<()> {
        if self.buf.remaining() < bytes {
            return Err(FacadeError::format(format!(
                "truncated blob: need {} bytes for {}, {} left",
                bytes,
                what,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    /// Guard `count * item_size` against the remaining input before allocating.
    fn need_items(&self, count: u32, item_size: usize, what: &str) -> FacadeResult<()> {
        let bytes = (count as usize)
            .checked_mul(item_size)
            .ok_or_else(|| FacadeError::format(format!("{} count {} overflows", what, count)))?;
        self.need(bytes, what)
    }

    fn u16(&mut self, what: &str) -> FacadeResult<u16> {
        self.need(2, what)?;
        Ok(self.buf.get_u16_le())
    }

    fn u32(&mut self, what: &str) -> FacadeResult<u32> {
        self.need(4, what)?;
        Ok(self.buf.get_u32_le())
    }

    fn skip_words(&mut self, words: usize, what: &str) -> FacadeResult<()> {
        self.need(words * 4, what)?;
        self.buf.advance(words * 4);
        Ok(())
    }

    fn string(&mut self, what: &str) -> FacadeResult<String> {
        let len = self.u32(what)?;
        self.need(len as usize, what)?;
        let raw = self.buf.copy_to_bytes(len as usize);
        String::from_utf8(raw.to_vec())
            .map_err(|_| FacadeError::format(format!("{} is not valid UTF-8", what)))
    }

    fn vec3s(&mut self, count: u32, what: &str) -> FacadeResult<Vec<[f32; 3]>> {
        self.need_items(count, 12, what)?;
        Ok((0..count)
            .map(|_| [self.buf.get_f32_le(), self.buf.get_f32_le(), self.buf.get_f32_le()])
            .collect())
    }

    fn vec2s(&mut self, count: u32, what: &str) -> FacadeResult<Vec<[f32; 2]>> {
        self.need_items(count, 8, what)?;
        Ok((0..count)
            .map(|_| [self.buf.get_f32_le(), self.buf.get_f32_le()])
            .collect())
    }

    fn triangles(&mut self, count: u32) -> FacadeResult<Vec<[u32; 3]>> {
        self.need_items(count, 12, "faces")?;
        Ok((0..count)
            .map(|_| [self.buf.get_u32_le(), self.buf.get_u32_le(), self.buf.get_u32_le()])
            .collect())
    }

    fn index_list(&mut self, what: &str) -> FacadeResult<Vec<u32>> {
        let count = self.u32(what)?;
        self.need_items(count, 4, what)?;
        Ok((0..count).map(|_| self.buf.get_u32_le()).collect())
    }
}

impl LegacyBlob {
    /// Decode a blob from raw file bytes.
    pub fn decode(data: &[u8]) -> FacadeResult<Self> {
        let mut r = Reader { buf: data };

        let version = BlobVersion {
            major: r.u16("version header")?,
            minor: r.u16("version header")?,
        };
        if !version.is_supported() {
            return Err(FacadeError::format(format!(
                "unsupported blob version {} (expected {} or {})",
                version,
                BlobVersion::V0_1,
                BlobVersion::V0_2
            )));
        }

        let name = r.string("blob name")?;
        let n_texture_channels = r.u32("texture channel count")?;
        if n_texture_channels > MAX_TEXTURE_CHANNELS {
            return Err(FacadeError::format(format!(
                "blob declares {} texture channels, at most {} supported",
                n_texture_channels, MAX_TEXTURE_CHANNELS
            )));
        }
        let has_2d = r.u32("2D flag")? > 0;
        r.skip_words(2, "reserved header words")?;
        let n_vertices = r.u32("vertex count")?;
        let n_faces = r.u32("face count")?;
        let n_pieces = r.u32("piece count")?;
        let n_curves = r.u32("curve count")?;
        r.skip_words(2, "reserved header words")?;

        let vertices_3d = r.vec3s(n_vertices, "3D vertices")?;
        let vertices_2d = if has_2d {
            Some(r.vec2s(n_vertices, "2D vertices")?)
        } else {
            None
        };

        let mut texture_channels = Vec::with_capacity(n_texture_channels as usize);
        for _ in 0..n_texture_channels {
            texture_channels.push(r.vec2s(n_vertices, "texture channel")?);
        }

        let faces = r.triangles(n_faces)?;

        let mut piece_names = Vec::new();
        for _ in 0..n_pieces {
            piece_names.push(r.string("piece name")?);
        }

        let mut curves = Vec::new();
        for _ in 0..n_curves {
            let name = r.string("curve name")?;
            let piece_id = r.u32("curve piece id")?;
            let vertices = r.index_list("curve vertices")?;
            curves.push(BlobCurve {
                name,
                piece_id,
                vertices,
            });
        }

        // 0.1 blobs carry no piece vertex sets; those are rebuilt below.
        let (pieces, unfilled) = if version == BlobVersion::V0_2 {
            r.skip_words(V0_2_RESERVED_WORDS, "reserved piece block")?;
            let mut pieces = Vec::with_capacity(piece_names.len());
            for name in piece_names {
                let vertices = r.index_list("piece vertices")?;
                pieces.push(BlobPiece { name, vertices });
            }
            (pieces, Vec::new())
        } else {
            (Vec::new(), piece_names)
        };

        if r.buf.has_remaining() {
            return Err(FacadeError::format(format!(
                "{} trailing bytes after blob body",
                r.buf.remaining()
            )));
        }

        let mut blob = LegacyBlob {
            version,
            name,
            vertices_3d,
            vertices_2d,
            texture_channels,
            faces,
            pieces,
            curves,
        };

        if version == BlobVersion::V0_1 {
            // Curves must be sane before they seed the piece flood fill.
            blob.check_curves()?;
            blob.pieces = upconvert_pieces(&blob, unfilled);
        }

        blob.self_check()?;
        Ok(blob)
    }

    /// Encode in the 0.2 layout.
    pub fn to_bytes(&self) -> FacadeResult<Vec<u8>> {
        self.self_check()?;

        let mut out = Vec::new();
        out.put_u16_le(BlobVersion::V0_2.major);
        out.put_u16_le(BlobVersion::V0_2.minor);
        put_string(&mut out, &self.name);
        out.put_u32_le(self.texture_channels.len() as u32);
        out.put_u32_le(u32::from(self.vertices_2d.is_some()));
        out.put_u32_le(0);
        out.put_u32_le(0);
        out.put_u32_le(self.vertices_3d.len() as u32);
        out.put_u32_le(self.faces.len() as u32);
        out.put_u32_le(self.pieces.len() as u32);
        out.put_u32_le(self.curves.len() as u32);
        out.put_u32_le(0);
        out.put_u32_le(0);

        for v in &self.vertices_3d {
            v.iter().for_each(|c| out.put_f32_le(*c));
        }
        if let Some(vertices_2d) = &self.vertices_2d {
            for v in vertices_2d {
                v.iter().for_each(|c| out.put_f32_le(*c));
            }
        }
        for channel in &self.texture_channels {
            for v in channel {
                v.iter().for_each(|c| out.put_f32_le(*c));
            }
        }
        for f in &self.faces {
            f.iter().for_each(|i| out.put_u32_le(*i));
        }
        for piece in &self.pieces {
            put_string(&mut out, &piece.name);
        }
        for curve in &self.curves {
            put_string(&mut out, &curve.name);
            out.put_u32_le(curve.piece_id);
            put_indices(&mut out, &curve.vertices);
        }
        for _ in 0..V0_2_RESERVED_WORDS {
            out.put_u32_le(0);
        }
        for piece in &self.pieces {
            put_indices(&mut out, &piece.vertices);
        }
        Ok(out)
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices_3d.len()
    }

    fn check_curves(&self) -> FacadeResult<()> {
        let n_vertices = self.num_vertices() as u32;
        for curve in &self.curves {
            if curve.vertices.is_empty() {
                return Err(FacadeError::format(format!(
                    "curve '{}' has zero vertices",
                    curve.name
                )));
            }
            if let Some(pos) = curve.vertices.iter().position(|v| *v >= n_vertices) {
                return Err(FacadeError::format(format!(
                    "curve '{}' vertex at position {} is out of bounds",
                    curve.name, pos
                )));
            }
        }
        Ok(())
    }

    /// Structural consistency check run after every load and before every save.
    pub fn self_check(&self) -> FacadeResult<()> {
        let n_vertices = self.num_vertices();

        if let Some(vertices_2d) = &self.vertices_2d {
            if vertices_2d.len() != n_vertices {
                return Err(FacadeError::format(format!(
                    "2D vertices have length {} and should be {}",
                    vertices_2d.len(),
                    n_vertices
                )));
            }
        }

        for (c, channel) in self.texture_channels.iter().enumerate() {
            if channel.len() != n_vertices {
                return Err(FacadeError::format(format!(
                    "texture channel {} has length {} and should be {}",
                    c,
                    channel.len(),
                    n_vertices
                )));
            }
        }

        for (f, face) in self.faces.iter().enumerate() {
            if let Some(v) = face.iter().position(|i| *i as usize >= n_vertices) {
                return Err(FacadeError::format(format!(
                    "face {}, index {} references a vertex beyond the {} known vertices",
                    f, v, n_vertices
                )));
            }
        }

        for piece in &self.pieces {
            if piece.vertices.iter().any(|i| *i as usize >= n_vertices) {
                return Err(FacadeError::format(format!(
                    "piece '{}' references an out of bounds vertex",
                    piece.name
                )));
            }
        }

        for curve in &self.curves {
            if curve.piece_id as usize >= self.pieces.len() {
                return Err(FacadeError::format(format!(
                    "curve '{}' is attached to invalid piece index {}",
                    curve.name, curve.piece_id
                )));
            }
        }
        self.check_curves()
    }

    /// Name to index map over pieces.
    pub fn piece_index(&self) -> HashMap<&str, u32> {
        self.pieces
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.as_str(), i as u32))
            .collect()
    }

    /// Per piece, curve name to the curve's position among that piece's curves.
    pub fn curve_index(&self) -> Vec<HashMap<&str, u32>> {
        let mut maps: Vec<HashMap<&str, u32>> = vec![HashMap::new(); self.pieces.len()];
        for curve in &self.curves {
            if let Some(map) = maps.get_mut(curve.piece_id as usize) {
                let next = map.len() as u32;
                map.entry(curve.name.as_str()).or_insert(next);
            }
        }
        maps
    }
}

/// Build 0.2 piece vertex sets for a 0.1 blob: flood fill over face adjacency
/// seeded from each piece's curve vertices.
fn upconvert_pieces(blob: &LegacyBlob, names: Vec<String>) -> Vec<BlobPiece> {
    let n_vertices = blob.num_vertices();

    let mut verts_to_faces: Vec<Vec<u32>> = vec![Vec::new(); n_vertices];
    for (f, face) in blob.faces.iter().enumerate() {
        for v in face {
            if let Some(list) = verts_to_faces.get_mut(*v as usize) {
                list.push(f as u32);
            }
        }
    }

    names
        .into_iter()
        .enumerate()
        .map(|(p, name)| {
            let mut visited = bitvec![0; n_vertices];
            let mut queue = Vec::new();
            for curve in blob.curves.iter().filter(|c| c.piece_id as usize == p) {
                for v in &curve.vertices {
                    let v = *v as usize;
                    if v < n_vertices && !visited[v] {
                        visited.set(v, true);
                        queue.push(v);
                    }
                }
            }

            while let Some(vert) = queue.pop() {
                for face in &verts_to_faces[vert] {
                    for v in blob.faces[*face as usize] {
                        let v = v as usize;
                        if v < n_vertices && !visited[v] {
                            visited.set(v, true);
                            queue.push(v);
                        }
                    }
                }
            }

            let vertices = visited.iter_ones().map(|v| v as u32).collect();
            BlobPiece { name, vertices }
        })
        .collect()
}

fn put_string(out: &mut Vec<u8>, s: &str) {
    out.put_u32_le(s.len() as u32);
    out.put_slice(s.as_bytes());
}

fn put_indices(out: &mut Vec<u8>, indices: &[u32]) {
    out.put_u32_le(indices.len() as u32);
    indices.iter().for_each(|i| out.put_u32_le(*i));
}
