use crate::renderer::vertex::Vertex;

/// CPU-side geometry handed in by the caller for one draw submission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.indices.is_empty()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_without_indices_is_empty() {
        let mesh = Mesh::new(vec![Vertex::new([0.0; 3], [0.0, 1.0, 0.0], [0.0; 2])], Vec::new());
        assert!(mesh.is_empty());
        assert!(Mesh::default().is_empty());
    }
}
