use rand::SeedableRng;
use rand::prelude::Distribution;
use rand_distr::Normal;
use rand_xorshift::XorShiftRng;
use nnnorm::arr::Matrix;
use nnnorm::component::Component;
use nnnorm::mem::AsRawSlice;

pub fn rng(seed:u64) -> XorShiftRng {
    XorShiftRng::seed_from_u64(seed)
}
pub fn random_matrix(rnd:&mut XorShiftRng,rows:usize,cols:usize,mean:f64,stddev:f64) -> Matrix<f64> {
    let n = Normal::<f64>::new(mean,stddev).unwrap();

    Matrix::from_vec(rows,cols,(0..rows*cols).map(|_| n.sample(rnd)).collect()).unwrap()
}
/// Objective used for gradient checks: sum of the elementwise product of the output with `r`
fn objective<C: Component<f64>>(c:&C,input:&Matrix<f64>,r:&Matrix<f64>) -> f64 {
    let (out,_) = c.propagate(input).unwrap();

    out.as_raw_slice().iter().zip(r.as_raw_slice().iter()).map(|(&o,&r)| o * r).sum()
}
/// Derivative of the objective w.r.t. the input by central differences
pub fn numeric_gradient<C: Component<f64>>(c:&C,input:&Matrix<f64>,r:&Matrix<f64>) -> Matrix<f64> {
    const H:f64 = 1e-5;

    let mut grad = Matrix::new(input.rows(),input.cols());

    for i in 0..input.rows() {
        for j in 0..input.cols() {
            let mut plus = input.clone();
            plus[(i,j)] += H;
            let mut minus = input.clone();
            minus[(i,j)] -= H;

            grad[(i,j)] = (objective(c,&plus,r) - objective(c,&minus,r)) / (2. * H);
        }
    }

    grad
}
/// Derivative of the objective w.r.t. the input through propagate and backprop
pub fn analytic_gradient<C: Component<f64>>(c:&C,input:&Matrix<f64>,r:&Matrix<f64>) -> Matrix<f64> {
    let (out,mut memo) = c.propagate(input).unwrap();

    c.backprop(input,&out,r,memo.as_mut()).unwrap()
}
pub fn assert_gradient_close(analytic:&Matrix<f64>,numeric:&Matrix<f64>) {
    assert_eq!(analytic.rows(),numeric.rows());
    assert_eq!(analytic.cols(),numeric.cols());

    let diff = analytic.as_raw_slice().iter().zip(numeric.as_raw_slice().iter())
                                              .map(|(&a,&n)| (a - n) * (a - n)).sum::<f64>().sqrt();
    let norm = numeric.as_raw_slice().iter().map(|&n| n * n).sum::<f64>().sqrt();

    assert!(diff <= 1e-4 * norm.max(1e-8),"relative error {} (norm {})",diff / norm.max(1e-8),norm);
}
pub fn assert_all_finite(m:&Matrix<f64>) {
    assert!(m.as_raw_slice().iter().all(|v| v.is_finite()),"{:?}",m);
}
