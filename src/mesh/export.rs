//! Model bundle serialization.
//!
//! Two download formats are supported:
//!
//! - **mesh-binary**: binary little-endian PLY. Faces carry a `tissue`
//!   property (the label id) and a per-face colour.
//! - **mesh-text**: Wavefront OBJ with one named object per tissue.

use std::fmt::Write as _;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::ExportError;

use super::reconstructor::ModelBundle;

/// Download format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeshFormat {
    #[serde(rename = "mesh-binary")]
    Binary,
    #[serde(rename = "mesh-text")]
    Text,
}

impl MeshFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            MeshFormat::Binary => "mesh-binary",
            MeshFormat::Text => "mesh-text",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            MeshFormat::Binary => "application/octet-stream",
            MeshFormat::Text => "text/plain; charset=utf-8",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            MeshFormat::Binary => "ply",
            MeshFormat::Text => "obj",
        }
    }
}

impl FromStr for MeshFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mesh-binary" => Ok(MeshFormat::Binary),
            "mesh-text" => Ok(MeshFormat::Text),
            other => Err(format!(
                "unsupported format '{}', expected 'mesh-binary' or 'mesh-text'",
                other
            )),
        }
    }
}

/// Encode a bundle in the requested format.
pub fn encode(bundle: &ModelBundle, format: MeshFormat) -> Result<Bytes, ExportError> {
    let vertices: usize = bundle.meshes.iter().map(|m| m.vertices.len()).sum();
    if vertices > u32::MAX as usize {
        return Err(ExportError::TooLarge { vertices });
    }

    Ok(match format {
        MeshFormat::Binary => encode_ply(bundle, vertices),
        MeshFormat::Text => encode_obj(bundle),
    })
}

// =============================================================================
// PLY
// =============================================================================

fn encode_ply(bundle: &ModelBundle, vertex_count: usize) -> Bytes {
    let face_count: usize = bundle.meshes.iter().map(|m| m.triangles.len()).sum();

    let mut header = String::new();
    header.push_str("ply\nformat binary_little_endian 1.0\n");
    let _ = writeln!(header, "comment series {}", bundle.series_id);
    for mesh in &bundle.meshes {
        let _ = writeln!(header, "comment tissue {} {}", mesh.label.id(), mesh.label);
    }
    let _ = writeln!(header, "element vertex {}", vertex_count);
    header.push_str("property float x\nproperty float y\nproperty float z\n");
    let _ = writeln!(header, "element face {}", face_count);
    header.push_str(
        "property list uchar uint vertex_indices\n\
         property uchar tissue\n\
         property uchar red\n\
         property uchar green\n\
         property uchar blue\n\
         end_header\n",
    );

    // 12 bytes per vertex, 1 + 12 + 4 bytes per face
    let mut buf = BytesMut::with_capacity(header.len() + vertex_count * 12 + face_count * 17);
    buf.put_slice(header.as_bytes());

    for mesh in &bundle.meshes {
        for v in &mesh.vertices {
            buf.put_f32_le(v[0]);
            buf.put_f32_le(v[1]);
            buf.put_f32_le(v[2]);
        }
    }

    let mut offset = 0u32;
    for mesh in &bundle.meshes {
        for t in &mesh.triangles {
            buf.put_u8(3);
            for &i in t {
                buf.put_u32_le(offset + i);
            }
            buf.put_u8(mesh.label.id());
            buf.put_slice(&mesh.color[..3]);
        }
        offset += mesh.vertices.len() as u32;
    }

    buf.freeze()
}

// =============================================================================
// OBJ
// =============================================================================

fn encode_obj(bundle: &ModelBundle) -> Bytes {
    let mut out = String::new();
    let _ = writeln!(out, "# series {}", bundle.series_id);

    // OBJ indices are 1-based and global across objects.
    let mut offset = 1usize;
    for mesh in &bundle.meshes {
        let _ = writeln!(out, "o {}", mesh.label);
        let _ = writeln!(
            out,
            "# tissue {} color #{:02X}{:02X}{:02X}",
            mesh.label.id(),
            mesh.color[0],
            mesh.color[1],
            mesh.color[2]
        );
        for v in &mesh.vertices {
            let _ = writeln!(out, "v {} {} {}", v[0], v[1], v[2]);
        }
        for t in &mesh.triangles {
            let _ = writeln!(
                out,
                "f {} {} {}",
                t[0] as usize + offset,
                t[1] as usize + offset,
                t[2] as usize + offset
            );
        }
        offset += mesh.vertices.len();
    }

    Bytes::from(out)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::TissueLabel;
    use crate::mesh::TissueMesh;
    use crate::volume::Spacing;

    fn triangle(label: TissueLabel, color: [u8; 4]) -> TissueMesh {
        TissueMesh {
            label,
            vertices: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            triangles: vec![[0, 1, 2]],
            color,
        }
    }

    fn bundle() -> ModelBundle {
        ModelBundle {
            series_id: "s1".to_string(),
            meshes: vec![
                triangle(TissueLabel::VisceralFat, [0xFF, 0xA5, 0x00, 0xFF]),
                triangle(TissueLabel::Organ, [0x00, 0x80, 0xFF, 0xFF]),
            ],
            dimensions: [2, 2, 2],
            spacing: Spacing::default(),
            requested: vec![TissueLabel::VisceralFat, TissueLabel::Organ],
        }
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("mesh-binary".parse::<MeshFormat>().unwrap(), MeshFormat::Binary);
        assert_eq!("mesh-text".parse::<MeshFormat>().unwrap(), MeshFormat::Text);
        assert!("glb".parse::<MeshFormat>().is_err());
    }

    #[test]
    fn test_ply_layout() {
        let bytes = encode(&bundle(), MeshFormat::Binary).unwrap();
        let marker = b"end_header\n";
        let body_start = bytes
            .windows(marker.len())
            .position(|w| w == marker)
            .unwrap()
            + marker.len();

        let header = std::str::from_utf8(&bytes[..body_start]).unwrap();
        assert!(header.contains("element vertex 6"));
        assert!(header.contains("element face 2"));
        assert!(header.contains("property uchar tissue"));

        let body = &bytes[body_start..];
        assert_eq!(body.len(), 6 * 12 + 2 * 17);

        // Second face: indices offset by the first mesh, organ label id.
        let face = &body[6 * 12 + 17..];
        assert_eq!(face[0], 3);
        assert_eq!(u32::from_le_bytes([face[1], face[2], face[3], face[4]]), 3);
        assert_eq!(face[13], TissueLabel::Organ.id());
        assert_eq!(&face[14..17], &[0x00, 0x80, 0xFF]);
    }

    #[test]
    fn test_obj_objects_and_indices() {
        let bytes = encode(&bundle(), MeshFormat::Text).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();

        assert!(text.contains("o visceral_fat\n"));
        assert!(text.contains("o organ\n"));
        assert!(text.contains("f 1 2 3\n"));
        assert!(text.contains("f 4 5 6\n"));
        assert_eq!(text.lines().filter(|l| l.starts_with("v ")).count(), 6);
    }

    #[test]
    fn test_empty_bundle() {
        let empty = ModelBundle {
            meshes: Vec::new(),
            ..bundle()
        };
        let bytes = encode(&empty, MeshFormat::Binary).unwrap();
        assert!(std::str::from_utf8(&bytes).unwrap().contains("element face 0"));
    }
}
