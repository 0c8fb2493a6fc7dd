/// Fixed ring of per-frame-in-flight state. The current index only moves via
/// [`PerFrame::advance_next_frame`] or an explicit jump to an acquired image
/// index.
pub struct PerFrame<T> {
    frames: Vec<T>,
    curr_frame: u16,
}

impl<T> PerFrame<T> {
    pub fn from_frames(frames: Vec<T>) -> Self {
        assert!(!frames.is_empty(), "need at least one frame in flight");
        Self {
            frames,
            curr_frame: 0,
        }
    }

    pub fn new_with<F>(num_frames: usize, mut init: F) -> Self
    where
        F: FnMut(usize) -> T,
    {
        Self::from_frames((0..num_frames).map(&mut init).collect())
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn curr(&self) -> &T {
        &self.frames[self.curr_frame as usize]
    }

    pub fn curr_mut(&mut self) -> &mut T {
        &mut self.frames[self.curr_frame as usize]
    }

    pub fn curr_idx(&self) -> usize {
        self.curr_frame as usize
    }

    pub fn get(&self, idx: usize) -> &T {
        &self.frames[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut T {
        &mut self.frames[idx]
    }

    pub fn prev_idx(&self) -> usize {
        (self.curr_frame as usize + self.frames.len() - 1) % self.frames.len()
    }

    pub fn advance_to_frame(&mut self, frame_idx: usize) {
        if frame_idx < self.frames.len() {
            self.curr_frame = frame_idx as u16;
        }
    }

    pub fn advance_next_frame(&mut self) {
        self.curr_frame = (self.curr_frame + 1) % self.frames.len() as u16;
    }

    pub fn for_each<F>(&self, func: F)
    where
        F: Fn(&T),
    {
        for i in &self.frames {
            func(i);
        }
    }

    pub fn for_each_mut<F>(&mut self, mut func: F)
    where
        F: FnMut(&mut T),
    {
        for i in &mut self.frames {
            func(i);
        }
    }
}
