/// Feed-forward soft-knee compressor with a stereo-linked detector.
#[derive(Clone, Debug)]
pub struct Compressor {
    threshold_db: f32,
    knee_db: f32,
    ratio: f32,
    attack_coef: f32,
    release_coef: f32,
    /// Smoothed gain reduction in dB (<= 0).
    envelope_db: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompressorSettings {
    pub threshold_db: f32,
    pub knee_db: f32,
    pub ratio: f32,
    pub attack_secs: f32,
    pub release_secs: f32,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            threshold_db: -24.0,
            knee_db: 30.0,
            ratio: 12.0,
            attack_secs: 0.003,
            release_secs: 0.25,
        }
    }
}

impl Compressor {
    pub fn new(sample_rate: u32, settings: CompressorSettings) -> Self {
        let fs = sample_rate.max(1) as f32;
        Self {
            threshold_db: settings.threshold_db,
            knee_db: settings.knee_db.max(0.0),
            ratio: settings.ratio.max(1.0),
            attack_coef: smoothing_coef(settings.attack_secs, fs),
            release_coef: smoothing_coef(settings.release_secs, fs),
            envelope_db: 0.0,
        }
    }

    /// Current gain reduction in dB (0 or negative).
    pub fn reduction_db(&self) -> f32 {
        self.envelope_db
    }

    /// Static curve: gain change in dB for an input level.
    pub fn gain_computer(&self, level_db: f32) -> f32 {
        let over = level_db - self.threshold_db;
        let slope = 1.0 / self.ratio - 1.0;
        if self.knee_db > 0.0 && 2.0 * over.abs() <= self.knee_db {
            let x = over + self.knee_db / 2.0;
            slope * x * x / (2.0 * self.knee_db)
        } else if over > 0.0 {
            slope * over
        } else {
            0.0
        }
    }

    /// Compress one interleaved frame in place.
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        let peak = frame.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        let level_db = 20.0 * peak.max(1e-9).log10();
        let target = self.gain_computer(level_db);
        let coef = if target < self.envelope_db {
            self.attack_coef
        } else {
            self.release_coef
        };
        self.envelope_db = coef * self.envelope_db + (1.0 - coef) * target;
        let gain = 10f32.powf(self.envelope_db / 20.0);
        for s in frame.iter_mut() {
            *s *= gain;
        }
    }

    pub fn reset(&mut self) {
        self.envelope_db = 0.0;
    }
}

fn smoothing_coef(seconds: f32, sample_rate: f32) -> f32 {
    if seconds <= 0.0 {
        0.0
    } else {
        (-1.0 / (seconds * sample_rate)).exp()
    }
}
