use sha1::Digest;

/// A SHA-1 hasher with an `std::io::Write` instance, so that identity inputs can be fed with
/// `write!` without intermediate allocation.
#[derive(Default)]
pub struct Sha1(sha1::Sha1);

pub type Sha1Digest = [u8; 20];

impl Sha1 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, input: &[u8]) {
        self.0.update(input);
    }

    pub fn hexdigest(self) -> String {
        hex::encode(self.0.finalize())
    }

    pub fn digest(self) -> Sha1Digest {
        self.0.finalize().into()
    }
}

pub fn sha1_hexdigest(input: &[u8]) -> String {
    let mut h = Sha1::default();
    h.update(input);
    h.hexdigest()
}

impl std::io::Write for Sha1 {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    #[inline]
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
