use biquad::{Biquad, Coefficients, DirectForm1, Q_BUTTERWORTH_F32, ToHertz, Type};

/// Center/corner frequencies of the graphic EQ, low to high.
pub const BAND_FREQUENCIES: [f32; 9] = [
    60.0, 170.0, 310.0, 600.0, 1_000.0, 3_000.0, 6_000.0, 12_000.0, 16_000.0,
];

pub const BAND_COUNT: usize = BAND_FREQUENCIES.len();

/// Gain limits accepted per band, in dB.
pub const MAX_BAND_GAIN_DB: f32 = 40.0;

const PEAKING_Q: f32 = 1.0;

/// Low-shelf, peaking bands and a high-shelf in series, one filter bank per channel.
pub struct Equalizer {
    sample_rate: u32,
    gains: [f32; BAND_COUNT],
    filters: Vec<Vec<DirectForm1<f32>>>,
}

impl Equalizer {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        let gains = [0.0; BAND_COUNT];
        let bank: Vec<DirectForm1<f32>> = (0..BAND_COUNT)
            .map(|band| DirectForm1::<f32>::new(band_coefficients(sample_rate, band, 0.0)))
            .collect();
        Self {
            sample_rate,
            gains,
            filters: vec![bank; channels.max(1)],
        }
    }

    pub fn gains(&self) -> [f32; BAND_COUNT] {
        self.gains
    }

    /// Set one band's gain. Out-of-range indices are ignored.
    pub fn set_gain(&mut self, band: usize, db: f32) -> bool {
        if band >= BAND_COUNT || !db.is_finite() {
            return false;
        }
        let db = db.clamp(-MAX_BAND_GAIN_DB, MAX_BAND_GAIN_DB);
        self.gains[band] = db;
        let coeffs = band_coefficients(self.sample_rate, band, db);
        for bank in &mut self.filters {
            bank[band].update_coefficients(coeffs);
        }
        true
    }

    /// Filter one interleaved frame in place.
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        for (sample, bank) in frame.iter_mut().zip(self.filters.iter_mut()) {
            let mut x = *sample;
            for filter in bank.iter_mut() {
                x = filter.run(x);
            }
            *sample = x;
        }
    }

    pub fn reset(&mut self) {
        for bank in &mut self.filters {
            for filter in bank.iter_mut() {
                filter.reset_state();
            }
        }
    }
}

fn band_coefficients(sample_rate: u32, band: usize, db: f32) -> Coefficients<f32> {
    let fs = sample_rate.max(1) as f32;
    // Keep f0 strictly below Nyquist for low device rates.
    let f0 = BAND_FREQUENCIES[band].min(fs * 0.45);
    let (kind, q) = if band == 0 {
        (Type::LowShelf(db), Q_BUTTERWORTH_F32)
    } else if band == BAND_COUNT - 1 {
        (Type::HighShelf(db), Q_BUTTERWORTH_F32)
    } else {
        (Type::PeakingEQ(db), PEAKING_Q)
    };
    Coefficients::<f32>::from_params(kind, fs.hz(), f0.hz(), q).unwrap_or(IDENTITY)
}

const IDENTITY: Coefficients<f32> = Coefficients {
    a1: 0.0,
    a2: 0.0,
    b0: 1.0,
    b1: 0.0,
    b2: 0.0,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_rms(eq: &mut Equalizer, freq: f32, sample_rate: u32) -> f32 {
        let n = sample_rate as usize / 2;
        let mut sum = 0.0f32;
        let mut counted = 0;
        for i in 0..n {
            let x = (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin() * 0.1;
            let mut frame = [x];
            eq.process_frame(&mut frame);
            if i > n / 2 {
                sum += frame[0] * frame[0];
                counted += 1;
            }
        }
        (sum / counted as f32).sqrt()
    }

    #[test]
    fn flat_eq_is_transparent() {
        let mut eq = Equalizer::new(48_000, 1);
        let rms = sine_rms(&mut eq, 1_000.0, 48_000);
        assert!((rms - 0.1 / 2f32.sqrt()).abs() < 1e-3, "rms {rms}");
    }

    #[test]
    fn peaking_band_boosts_its_frequency() {
        let mut eq = Equalizer::new(48_000, 1);
        assert!(eq.set_gain(4, 12.0));
        let rms = sine_rms(&mut eq, 1_000.0, 48_000);
        let expected = 0.1 / 2f32.sqrt() * 10f32.powf(12.0 / 20.0);
        assert!((rms / expected - 1.0).abs() < 0.05, "rms {rms} expected {expected}");
    }

    #[test]
    fn out_of_range_band_is_ignored() {
        let mut eq = Equalizer::new(44_100, 2);
        assert!(!eq.set_gain(BAND_COUNT, 6.0));
        assert!(!eq.set_gain(2, f32::NAN));
        assert_eq!(eq.gains(), [0.0; BAND_COUNT]);
    }

    #[test]
    fn gains_are_clamped() {
        let mut eq = Equalizer::new(44_100, 2);
        eq.set_gain(0, 100.0);
        eq.set_gain(8, -100.0);
        assert_eq!(eq.gains()[0], MAX_BAND_GAIN_DB);
        assert_eq!(eq.gains()[8], -MAX_BAND_GAIN_DB);
    }

    #[test]
    fn high_bands_survive_low_sample_rates() {
        let mut eq = Equalizer::new(16_000, 1);
        assert!(eq.set_gain(8, 6.0));
        let mut frame = [0.5f32];
        eq.process_frame(&mut frame);
        assert!(frame[0].is_finite());
    }
}
