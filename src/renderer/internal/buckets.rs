use crate::renderer::device::ShaderHandle;

/// Index of a batch in the engine's batch pool.
pub type BatchId = usize;

/// Every batch drawn with one shader this frame, in creation order.
#[derive(Debug, Clone)]
pub struct Bucket {
    shader: ShaderHandle,
    batches: Vec<BatchId>,
}

impl Bucket {
    pub fn shader(&self) -> ShaderHandle {
        self.shader
    }

    pub fn batches(&self) -> &[BatchId] {
        &self.batches
    }

    pub fn last_batch(&self) -> Option<BatchId> {
        self.batches.last().copied()
    }

    pub(crate) fn push(&mut self, batch: BatchId) {
        self.batches.push(batch);
    }
}

/// Shader handle to bucket, in first-seen order.
///
/// A frame rarely sees more than a handful of distinct shaders, so lookups
/// are a linear scan.
#[derive(Debug, Default)]
pub struct ShaderBucketMapper {
    buckets: Vec<Bucket>,
}

impl ShaderBucketMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_bucket(&self, shader: ShaderHandle) -> Option<usize> {
        self.buckets
            .iter()
            .position(|bucket| bucket.shader == shader)
    }

    /// Opens an empty bucket for `shader` at the end of the draw order.
    pub fn new_bucket(&mut self, shader: ShaderHandle) -> usize {
        debug_assert!(
            self.find_bucket(shader).is_none(),
            "shader {:?} already has a bucket",
            shader
        );
        self.buckets.push(Bucket {
            shader,
            batches: Vec::new(),
        });
        self.buckets.len() - 1
    }

    pub fn find_or_create(&mut self, shader: ShaderHandle) -> usize {
        match self.find_bucket(shader) {
            Some(index) => index,
            None => self.new_bucket(shader),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Bucket> {
        self.buckets.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Bucket> {
        self.buckets.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_shader_resolves_to_same_bucket() {
        let mut mapper = ShaderBucketMapper::new();
        let shader = ShaderHandle::new(3);

        let first = mapper.find_or_create(shader);
        let second = mapper.find_or_create(shader);

        assert_eq!(first, second);
        assert_eq!(mapper.find_bucket(shader), Some(first));
        assert_eq!(mapper.len(), 1);
    }

    #[test]
    fn buckets_keep_first_seen_order() {
        let mut mapper = ShaderBucketMapper::new();
        for id in [5, 1, 9, 1, 5, 2] {
            mapper.find_or_create(ShaderHandle::new(id));
        }

        let order: Vec<u32> = mapper.iter().map(|b| b.shader().index()).collect();
        assert_eq!(order, vec![5, 1, 9, 2]);
        assert_eq!(mapper.get(2).map(|b| b.shader()), Some(ShaderHandle::new(9)));
        assert!(mapper.get(4).is_none());
    }

    #[test]
    fn clear_drops_every_bucket() {
        let mut mapper = ShaderBucketMapper::new();
        let index = mapper.new_bucket(ShaderHandle::new(1));
        mapper.get_mut(index).unwrap().push(0);
        mapper.clear();

        assert!(mapper.is_empty());
        assert_eq!(mapper.find_bucket(ShaderHandle::new(1)), None);
    }

    #[test]
    fn batches_stay_in_push_order() {
        let mut mapper = ShaderBucketMapper::new();
        let index = mapper.new_bucket(ShaderHandle::new(1));
        let bucket = mapper.get_mut(index).unwrap();
        bucket.push(4);
        bucket.push(2);

        assert_eq!(bucket.batches(), &[4, 2]);
        assert_eq!(bucket.last_batch(), Some(2));
    }
}
