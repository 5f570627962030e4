use approx::assert_relative_eq;
use statrs::statistics::Statistics as _;
use nnnorm::arr::Matrix;
use nnnorm::component::{Component, FixedScaleComponent};
use crate::common::{analytic_gradient, assert_gradient_close, numeric_gradient, random_matrix, rng};

#[test]
fn test_rms_equals_target() {
    let mut rnd = rng(1);
    let c = FixedScaleComponent::<f64>::new(12,4,2.5,false).unwrap();
    let input = random_matrix(&mut rnd,7,12,0.3,3.);

    let (out,memo) = c.propagate(&input).unwrap();

    assert!(memo.is_none());
    assert_eq!(out.cols(),12);

    for block in out.frames(4) {
        assert_relative_eq!(block.iter().quadratic_mean(),2.5,max_relative = 1e-12);
    }
}

#[test]
fn test_zero_block_stays_zero() {
    let c = FixedScaleComponent::<f32>::new(4,2,1.,false).unwrap();
    let input = Matrix::from_vec(2,4,vec![0.,0.,1.,-1.,0.,0.,0.,0.]).unwrap();

    let (out,_) = c.propagate(&input).unwrap();

    assert_eq!(out.into_vec(),vec![0.,0.,1.,-1.,0.,0.,0.,0.]);
}

#[test]
fn test_zero_block_derivative_uses_floor() {
    let c = FixedScaleComponent::<f64>::new(2,2,1.,false).unwrap();
    let input = Matrix::new(1,2);
    let dy = Matrix::from_vec(1,2,vec![1.,-0.5]).unwrap();

    let d = c.backprop(&input,&Matrix::new(0,0),&dy,None).unwrap();

    assert_eq!(d.into_vec(),vec![2f64.powi(33),-(2f64.powi(32))]);
}

#[test]
fn test_gradient() {
    let mut rnd = rng(2);
    let c = FixedScaleComponent::<f64>::new(6,3,2.,false).unwrap();
    let input = random_matrix(&mut rnd,4,6,0.,1.);
    let r = random_matrix(&mut rnd,4,6,0.,1.);

    assert_gradient_close(&analytic_gradient(&c,&input,&r),&numeric_gradient(&c,&input,&r));
}

#[test]
fn test_gradient_with_log_stddev() {
    let mut rnd = rng(3);
    let c = FixedScaleComponent::<f64>::new(6,2,1.,true).unwrap();
    let input = random_matrix(&mut rnd,3,6,0.5,2.);
    let r = random_matrix(&mut rnd,3,c.output_dim(),0.,1.);

    assert_eq!(c.output_dim(),9);
    assert_gradient_close(&analytic_gradient(&c,&input,&r),&numeric_gradient(&c,&input,&r));
}

#[test]
fn test_input_dim_is_checked() {
    let c = FixedScaleComponent::<f64>::new(6,2,1.,true).unwrap();

    assert!(c.propagate(&Matrix::new(2,4)).is_err());
    assert!(c.backprop(&Matrix::new(2,6),&Matrix::new(0,0),&Matrix::new(2,6),None).is_err());
}

#[test]
fn test_properties() {
    let p = FixedScaleComponent::<f32>::new(4,4,1.,false).unwrap().properties();

    assert!(p.simple_component);
    assert!(p.backprop_needs_input);
    assert!(!p.backprop_needs_output);
    assert!(p.propagate_in_place);
    assert!(p.backprop_in_place);
    assert!(!p.uses_memo);
    assert!(!p.stores_stats);
    assert!(!p.input_contiguous);

    let p = FixedScaleComponent::<f32>::new(4,2,1.,true).unwrap().properties();

    assert!(!p.propagate_in_place);
    assert!(!p.backprop_in_place);
    assert!(p.input_contiguous);
    assert!(p.output_contiguous);
}
