//! g2o 3-D dataset text format.
//!
//! Writes `VERTEX_SE3:QUAT` and `EDGE_SE3:QUAT` lines. The on-file
//! information matrix uses the g2o component order (translation first);
//! conversion to this crate's rotation-first covariance happens here so
//! round-trips are exact.

use nalgebra::{Matrix6, Quaternion, UnitQuaternion, Vector3};

use crate::core::types::{Covariance6, Pose3D};
use crate::error::{Result, SlamError};

/// A parsed vertex line.
#[derive(Debug, Clone, PartialEq)]
pub struct G2oVertex {
    /// Raw key value.
    pub id: u64,
    /// World-frame pose.
    pub pose: Pose3D,
}

/// A parsed edge line.
#[derive(Debug, Clone, PartialEq)]
pub struct G2oEdge {
    /// Raw source key.
    pub from: u64,
    /// Raw target key.
    pub to: u64,
    /// Relative pose measurement.
    pub delta: Pose3D,
    /// Measurement covariance (rotation-first order).
    pub covariance: Covariance6,
}

/// Parsed file contents.
#[derive(Debug, Clone, Default)]
pub struct G2oGraph {
    pub vertices: Vec<G2oVertex>,
    pub edges: Vec<G2oEdge>,
}

/// Swap between rotation-first (this crate) and translation-first
/// (g2o) 6×6 component order.
fn swap_blocks(m: &Matrix6<f64>) -> Matrix6<f64> {
    let mut out = Matrix6::zeros();
    for r in 0..6 {
        for c in 0..6 {
            out[((r + 3) % 6, (c + 3) % 6)] = m[(r, c)];
        }
    }
    out
}

fn format_pose(pose: &Pose3D) -> String {
    let t = pose.translation();
    let q = pose.rotation().into_inner();
    format!(
        "{} {} {} {} {} {} {}",
        t.x, t.y, t.z, q.i, q.j, q.k, q.w
    )
}

/// Serialize vertices and edges to g2o text.
pub fn write_g2o(vertices: &[G2oVertex], edges: &[G2oEdge]) -> String {
    let mut out = String::new();
    for v in vertices {
        out.push_str(&format!(
            "VERTEX_SE3:QUAT {} {}\n",
            v.id,
            format_pose(&v.pose)
        ));
    }
    for e in edges {
        let info = swap_blocks(&e.covariance.information());
        let mut line = format!(
            "EDGE_SE3:QUAT {} {} {}",
            e.from,
            e.to,
            format_pose(&e.delta)
        );
        // Upper triangle, row major: 21 entries.
        for r in 0..6 {
            for c in r..6 {
                line.push_str(&format!(" {}", info[(r, c)]));
            }
        }
        line.push('\n');
        out.push_str(&line);
    }
    out
}

fn parse_pose(tokens: &[&str]) -> Result<Pose3D> {
    if tokens.len() < 7 {
        return Err(SlamError::Persistence(
            "g2o pose needs 7 components".to_string(),
        ));
    }
    let v: Vec<f64> = tokens[..7]
        .iter()
        .map(|t| t.parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| SlamError::Persistence(format!("bad g2o number: {}", e)))?;
    let rotation = UnitQuaternion::from_quaternion(Quaternion::new(v[6], v[3], v[4], v[5]));
    Ok(Pose3D::from_parts(Vector3::new(v[0], v[1], v[2]), rotation))
}

/// Parse g2o text. Unknown line types are skipped.
pub fn parse_g2o(content: &str) -> Result<G2oGraph> {
    let mut graph = G2oGraph::default();
    for (lineno, line) in content.lines().enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.first() {
            Some(&"VERTEX_SE3:QUAT") => {
                if tokens.len() < 9 {
                    return Err(SlamError::Persistence(format!(
                        "short vertex line {}",
                        lineno + 1
                    )));
                }
                let id = tokens[1]
                    .parse::<u64>()
                    .map_err(|e| SlamError::Persistence(format!("bad vertex id: {}", e)))?;
                graph.vertices.push(G2oVertex {
                    id,
                    pose: parse_pose(&tokens[2..])?,
                });
            }
            Some(&"EDGE_SE3:QUAT") => {
                if tokens.len() < 10 + 21 {
                    return Err(SlamError::Persistence(format!(
                        "short edge line {}",
                        lineno + 1
                    )));
                }
                let from = tokens[1]
                    .parse::<u64>()
                    .map_err(|e| SlamError::Persistence(format!("bad edge id: {}", e)))?;
                let to = tokens[2]
                    .parse::<u64>()
                    .map_err(|e| SlamError::Persistence(format!("bad edge id: {}", e)))?;
                let delta = parse_pose(&tokens[3..10])?;
                let mut info = Matrix6::zeros();
                let mut idx = 10;
                for r in 0..6 {
                    for c in r..6 {
                        let v = tokens[idx].parse::<f64>().map_err(|e| {
                            SlamError::Persistence(format!("bad information entry: {}", e))
                        })?;
                        info[(r, c)] = v;
                        info[(c, r)] = v;
                        idx += 1;
                    }
                }
                let info_rot_first = swap_blocks(&info);
                let covariance = Covariance6::new(
                    info_rot_first
                        .try_inverse()
                        .unwrap_or_else(Matrix6::identity),
                );
                graph.edges.push(G2oEdge {
                    from,
                    to,
                    delta,
                    covariance,
                });
            }
            _ => {}
        }
    }
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_vertex_roundtrip() {
        let vertices = vec![
            G2oVertex {
                id: 7,
                pose: Pose3D::from_xyz_rpy(1.0, -2.0, 0.5, 0.1, 0.2, 0.3),
            },
            G2oVertex {
                id: 8,
                pose: Pose3D::identity(),
            },
        ];
        let text = write_g2o(&vertices, &[]);
        let parsed = parse_g2o(&text).unwrap();
        assert_eq!(parsed.vertices.len(), 2);
        assert_eq!(parsed.vertices[0].id, 7);
        assert_relative_eq!(
            parsed.vertices[0].pose.translation(),
            vertices[0].pose.translation(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_edge_roundtrip_preserves_covariance() {
        let edges = vec![G2oEdge {
            from: 1,
            to: 2,
            delta: Pose3D::from_translation(1.0, 0.0, 0.0),
            covariance: Covariance6::from_sigmas(0.01, 0.05),
        }];
        let text = write_g2o(&[], &edges);
        let parsed = parse_g2o(&text).unwrap();
        assert_eq!(parsed.edges.len(), 1);
        let c = &parsed.edges[0].covariance;
        assert_relative_eq!(c.matrix[(0, 0)], 1e-4, epsilon = 1e-10);
        assert_relative_eq!(c.matrix[(3, 3)], 2.5e-3, epsilon = 1e-10);
    }

    #[test]
    fn test_unknown_lines_skipped() {
        let text = "FIX 0\nVERTEX_SE3:QUAT 0 0 0 0 0 0 0 1\n";
        let parsed = parse_g2o(text).unwrap();
        assert_eq!(parsed.vertices.len(), 1);
        assert!(parsed.edges.is_empty());
    }

    #[test]
    fn test_malformed_line_errors() {
        assert!(parse_g2o("VERTEX_SE3:QUAT 0 0 0\n").is_err());
    }
}
