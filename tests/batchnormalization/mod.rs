use approx::{assert_abs_diff_eq, assert_relative_eq};
use statrs::statistics::Statistics as _;
use nnnorm::arr::Matrix;
use nnnorm::component::{BatchNormComponent, Component};
use crate::common::{analytic_gradient, assert_gradient_close, numeric_gradient, random_matrix, rng};

fn trained(rnd:&mut rand_xorshift::XorShiftRng,steps:usize) -> BatchNormComponent<f64> {
    let mut c = BatchNormComponent::new(6,3,0.001,1.).unwrap();

    for _ in 0..steps {
        let input = random_matrix(rnd,5,6,1.,2.);
        let (out,mut memo) = c.propagate(&input).unwrap();
        let dy = random_matrix(rnd,5,6,0.,1.);

        c.backprop(&input,&out,&dy,memo.as_mut()).unwrap();
        c.store_stats(&input,&out,memo.as_ref()).unwrap();
    }

    c
}

#[test]
fn test_exact_normalization() {
    let c = BatchNormComponent::<f64>::new(2,1,1e-9,2.).unwrap();
    // mean 0 and uncentered variance 1 in both columns
    let input = Matrix::from_vec(4,2,vec![1.,-1.,-1.,1.,1.,1.,-1.,-1.]).unwrap();

    let (out,memo) = c.propagate(&input).unwrap();
    let memo = memo.unwrap();

    assert_eq!(memo.count,8.);
    assert_abs_diff_eq!(memo.mean[0],0.);
    assert_abs_diff_eq!(memo.uvar[0],1.);

    for (&o,&x) in out.into_vec().iter().zip(input.into_vec().iter()) {
        assert_relative_eq!(o,2. * x,max_relative = 1e-8);
    }

    assert_relative_eq!(memo.scale[0],2.,max_relative = 1e-8);
}

#[test]
fn test_output_statistics() {
    let mut rnd = rng(11);
    let c = BatchNormComponent::<f64>::new(4,4,0.001,1.5).unwrap();
    let input = random_matrix(&mut rnd,64,4,3.,5.);

    let (out,_) = c.propagate(&input).unwrap();

    for col in 0..4 {
        let column = (0..64).map(|r| out[(r,col)]).collect::<Vec<f64>>();

        assert_abs_diff_eq!(column.iter().mean(),0.,epsilon = 1e-10);
        assert_relative_eq!(column.iter().population_std_dev(),1.5,max_relative = 1e-4);
    }
}

#[test]
fn test_gradient() {
    let mut rnd = rng(12);
    let c = BatchNormComponent::<f64>::new(4,2,0.001,1.).unwrap();
    let input = random_matrix(&mut rnd,5,4,0.5,1.);
    let r = random_matrix(&mut rnd,5,4,0.,1.);

    assert_gradient_close(&analytic_gradient(&c,&input,&r),&numeric_gradient(&c,&input,&r));
}

#[test]
fn test_gradient_with_target_rms() {
    let mut rnd = rng(13);
    let c = BatchNormComponent::<f64>::new(3,3,0.01,2.5).unwrap();
    let input = random_matrix(&mut rnd,6,3,-1.,0.7);
    let r = random_matrix(&mut rnd,6,3,0.,1.);

    assert_gradient_close(&analytic_gradient(&c,&input,&r),&numeric_gradient(&c,&input,&r));
}

#[test]
fn test_mode_requires_statistics() {
    let mut c = BatchNormComponent::<f64>::new(6,3,0.001,1.).unwrap();

    assert!(c.set_test_mode(true).is_err());
    assert!(!c.test_mode());
    assert!(c.set_test_mode(false).is_ok());

    let mut c = trained(&mut rng(14),1);

    assert!(c.set_test_mode(true).is_ok());
    assert!(c.derived().is_some());

    let p = c.properties();

    assert!(!p.uses_memo);
    assert!(!p.stores_stats);
}

#[test]
fn test_mode_is_deterministic() {
    let mut rnd = rng(15);
    let mut c = trained(&mut rnd,3);

    c.set_test_mode(true).unwrap();

    let input = random_matrix(&mut rnd,4,6,1.,2.);
    let before = c.clone();

    let (o1,m1) = c.propagate(&input).unwrap();
    let (o2,m2) = c.propagate(&input).unwrap();

    assert!(m1.is_none() && m2.is_none());
    assert_eq!(o1,o2);
    assert_eq!(c,before);

    c.store_stats(&input,&o1,None).unwrap();
    assert_eq!(c,before);
}

#[test]
fn test_mode_uses_accumulated_statistics() {
    let mut rnd = rng(16);
    let mut c = trained(&mut rnd,4);

    let expected = c.stats().derive(c.epsilon(),c.target_rms());

    c.set_test_mode(true).unwrap();

    let input = random_matrix(&mut rnd,2,6,0.,1.);
    let (out,_) = c.propagate(&input).unwrap();

    assert_eq!(out,expected.apply(&input));

    let dy = random_matrix(&mut rnd,2,6,0.,1.);
    let d = c.backprop(&input,&out,&dy,None).unwrap();

    assert_eq!(d,expected.apply_scale(&dy));
}

#[test]
fn test_mode_without_statistics_fails_to_propagate() {
    let mut c = trained(&mut rng(17),1);

    c.set_test_mode(true).unwrap();
    c.scale(-1.);

    assert!(c.test_mode());
    assert!(c.propagate(&Matrix::new(1,6)).is_err());
}

#[test]
fn test_reset_law() {
    let mut c = trained(&mut rng(18),2);

    c.refresh_derived();
    assert!(c.derived().is_some());

    c.scale(-1.);

    assert_eq!(c.stats().count,0.);
    assert!(c.stats().sum.iter().all(|&v| v == 0.));
    assert!(c.derived().is_none());
}

#[test]
fn test_scale_and_zero_stats() {
    let mut c = trained(&mut rng(19),2);
    let count = c.stats().count;

    c.scale(0.5);
    assert_eq!(c.stats().count,count * 0.5);

    c.zero_stats();
    assert_eq!(c.stats().count,0.);
    assert!(c.stats().is_empty());
}

#[test]
fn test_negative_add_is_ignored() {
    let mut c = trained(&mut rng(21),2);
    let other = trained(&mut rng(22),3);

    c.refresh_derived();

    let before = c.clone();

    c.add(-0.5,&other).unwrap();
    assert_eq!(c,before);
    assert!(c.derived().is_some());

    let wrong = BatchNormComponent::<f64>::new(6,2,0.001,1.).unwrap();

    assert!(c.add(-0.5,&wrong).is_err());
    assert!(c.add(1.,&wrong).is_err());
    assert_eq!(c,before);

    c.add(1.,&other).unwrap();
    assert_eq!(c.stats().count,before.stats().count + other.stats().count);
    assert!(c.derived().is_none());
}

#[test]
fn test_empty_minibatch() {
    let c = BatchNormComponent::<f64>::new(2,2,0.001,1.).unwrap();
    let input = Matrix::new(0,2);

    let (out,memo) = c.propagate(&input).unwrap();
    let mut memo = memo.unwrap();

    assert_eq!(out.rows(),0);
    assert_eq!(memo.count,0.);

    let d = c.backprop(&input,&out,&Matrix::new(0,2),Some(&mut memo)).unwrap();

    assert_eq!(d.rows(),0);
}

#[test]
fn test_info() {
    let c = trained(&mut rng(20),1);
    let info = c.info();

    assert!(info.starts_with("BatchNormComponent"));
    assert!(info.contains("count=10"));
    assert!(info.contains("data-stddev"));
}
