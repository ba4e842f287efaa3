
use num_complex::Complex;

/// Complex sample formats accepted by the acquisition and tracking blocks.  Arithmetic is done in
/// double precision; integer formats are rounded and saturated on the way back.
pub trait IqSample: Copy + Default + Send + Sync + 'static {
	fn to_c64(self) -> Complex<f64>;
	fn from_c64(c:Complex<f64>) -> Self;
}

impl IqSample for Complex<f64> {
	fn to_c64(self) -> Complex<f64> { self }
	fn from_c64(c:Complex<f64>) -> Self { c }
}

impl IqSample for Complex<f32> {
	fn to_c64(self) -> Complex<f64> { Complex{ re: self.re as f64, im: self.im as f64 } }
	fn from_c64(c:Complex<f64>) -> Self { Complex{ re: c.re as f32, im: c.im as f32 } }
}

impl IqSample for Complex<i16> {
	fn to_c64(self) -> Complex<f64> { Complex{ re: self.re as f64, im: self.im as f64 } }
	fn from_c64(c:Complex<f64>) -> Self { Complex{ re: saturate_i16(c.re), im: saturate_i16(c.im) } }
}

fn saturate_i16(x:f64) -> i16 {
	let r = x.round();
	if      r > i16::MAX as f64 { i16::MAX }
	else if r < i16::MIN as f64 { i16::MIN }
	else                        { r as i16 }
}
