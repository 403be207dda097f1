//! Binary PCD v0.7 point-cloud files.
//!
//! Fixed layout: three little-endian `f32` fields (x, y, z), one point
//! per record, `DATA binary`. This matches how keyed scans are archived
//! in the persistence bundle.

use std::io::{Read, Write};

use crate::core::types::{Point3D, PointCloud3D};
use crate::error::{Result, SlamError};

/// Serialize a cloud as binary PCD into `writer`.
pub fn write_pcd<W: Write>(cloud: &PointCloud3D, writer: &mut W) -> Result<()> {
    let n = cloud.len();
    let header = format!(
        "# .PCD v0.7 - Point Cloud Data file format\n\
         VERSION 0.7\n\
         FIELDS x y z\n\
         SIZE 4 4 4\n\
         TYPE F F F\n\
         COUNT 1 1 1\n\
         WIDTH {}\n\
         HEIGHT 1\n\
         VIEWPOINT 0 0 0 1 0 0 0\n\
         POINTS {}\n\
         DATA binary\n",
        n, n
    );
    writer.write_all(header.as_bytes())?;
    let mut buf = Vec::with_capacity(n * 12);
    for p in &cloud.points {
        buf.extend_from_slice(&p.x.to_le_bytes());
        buf.extend_from_slice(&p.y.to_le_bytes());
        buf.extend_from_slice(&p.z.to_le_bytes());
    }
    writer.write_all(&buf)?;
    Ok(())
}

/// Parse a binary PCD file.
pub fn read_pcd<R: Read>(reader: &mut R) -> Result<PointCloud3D> {
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;

    // The header is ASCII lines up to and including "DATA binary".
    let mut offset = 0usize;
    let mut points = 0usize;
    let mut saw_data = false;
    while offset < raw.len() {
        let end = raw[offset..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| offset + p)
            .ok_or_else(|| SlamError::Persistence("pcd header truncated".to_string()))?;
        let line = std::str::from_utf8(&raw[offset..end])
            .map_err(|_| SlamError::Persistence("pcd header is not utf-8".to_string()))?;
        offset = end + 1;

        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.first() {
            Some(&"POINTS") => {
                points = tokens
                    .get(1)
                    .and_then(|t| t.parse::<usize>().ok())
                    .ok_or_else(|| SlamError::Persistence("bad POINTS line".to_string()))?;
            }
            Some(&"DATA") => {
                if tokens.get(1) != Some(&"binary") {
                    return Err(SlamError::Persistence(
                        "only binary pcd data is supported".to_string(),
                    ));
                }
                saw_data = true;
                break;
            }
            _ => {}
        }
    }
    if !saw_data {
        return Err(SlamError::Persistence("pcd file has no DATA line".to_string()));
    }

    let body = &raw[offset..];
    if body.len() < points * 12 {
        return Err(SlamError::Persistence(format!(
            "pcd body too short: {} bytes for {} points",
            body.len(),
            points
        )));
    }
    let mut cloud = PointCloud3D::with_capacity(points);
    for i in 0..points {
        let base = i * 12;
        let x = f32::from_le_bytes(body[base..base + 4].try_into().unwrap());
        let y = f32::from_le_bytes(body[base + 4..base + 8].try_into().unwrap());
        let z = f32::from_le_bytes(body[base + 8..base + 12].try_into().unwrap());
        cloud.push(Point3D::new(x, y, z));
    }
    Ok(cloud)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut cloud = PointCloud3D::new();
        cloud.push(Point3D::new(1.0, -2.5, 0.125));
        cloud.push(Point3D::new(0.0, 0.0, 0.0));
        cloud.push(Point3D::new(-7.25, 3.5, 9.0));

        let mut buf = Vec::new();
        write_pcd(&cloud, &mut buf).unwrap();
        let parsed = read_pcd(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed, cloud);
    }

    #[test]
    fn test_empty_cloud_roundtrip() {
        let cloud = PointCloud3D::new();
        let mut buf = Vec::new();
        write_pcd(&cloud, &mut buf).unwrap();
        let parsed = read_pcd(&mut buf.as_slice()).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_truncated_body_rejected() {
        let mut cloud = PointCloud3D::new();
        cloud.push(Point3D::new(1.0, 2.0, 3.0));
        let mut buf = Vec::new();
        write_pcd(&cloud, &mut buf).unwrap();
        buf.truncate(buf.len() - 4);
        assert!(read_pcd(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn test_ascii_data_rejected() {
        let text = b"VERSION 0.7\nPOINTS 1\nDATA ascii\n1 2 3\n";
        assert!(read_pcd(&mut text.as_slice()).is_err());
    }
}
