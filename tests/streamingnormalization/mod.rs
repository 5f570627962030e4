use approx::assert_relative_eq;
use rand_xorshift::XorShiftRng;
use nnnorm::arr::Matrix;
use nnnorm::component::{Component, StreamingNormComponent};
use nnnorm::component::streamingnormalization::IndirectTerms;
use crate::common::{analytic_gradient, assert_all_finite, assert_gradient_close, numeric_gradient, random_matrix, rng};

fn train_step(c:&mut StreamingNormComponent<f64>,rnd:&mut XorShiftRng,rows:usize) {
    let input = random_matrix(rnd,rows,c.input_dim(),2.,3.);
    let (out,mut memo) = c.propagate(&input).unwrap();
    let dy = random_matrix(rnd,rows,c.input_dim(),0.,1.);

    c.backprop(&input,&out,&dy,memo.as_mut()).unwrap();
    c.store_stats(&input,&out,memo.as_ref()).unwrap();
}

#[test]
fn test_bootstrap_single_row() {
    for &iid in [true,false].iter() {
        let c = StreamingNormComponent::<f64>::new(4,2,0.001,1.,iid).unwrap();
        let input = Matrix::from_vec(1,4,vec![0.3,-7.,1e3,0.]).unwrap();

        let (out,memo) = c.propagate(&input).unwrap();

        assert_all_finite(&out);
        assert!(memo.is_some());
    }

    let c = StreamingNormComponent::<f64>::new(2,2,0.001,1.,true).unwrap();
    let (out,_) = c.propagate(&Matrix::from_vec(1,2,vec![5.,-5.]).unwrap()).unwrap();

    assert_eq!(out.into_vec(),vec![0.,0.]);
}

#[test]
fn test_gradient_with_indirect_derivative() {
    let mut rnd = rng(21);
    let c = StreamingNormComponent::<f64>::new(4,2,0.001,1.,true).unwrap();
    let input = random_matrix(&mut rnd,5,4,1.,2.);
    let r = random_matrix(&mut rnd,5,4,0.,1.);

    assert_gradient_close(&analytic_gradient(&c,&input,&r),&numeric_gradient(&c,&input,&r));
}

#[test]
fn test_gradient_with_indirect_derivative_and_target_rms() {
    let mut rnd = rng(22);
    let c = StreamingNormComponent::<f64>::new(3,3,0.01,0.5,true).unwrap();
    let input = random_matrix(&mut rnd,7,3,0.,1.);
    let r = random_matrix(&mut rnd,7,3,0.,1.);

    assert_gradient_close(&analytic_gradient(&c,&input,&r),&numeric_gradient(&c,&input,&r));
}

#[test]
fn test_gradient_without_indirect_derivative() {
    let mut rnd = rng(23);
    let mut c = StreamingNormComponent::<f64>::new(4,2,0.001,1.,false).unwrap();

    train_step(&mut c,&mut rnd,6);
    train_step(&mut c,&mut rnd,6);

    assert_eq!(c.moments().count,0.);

    let input = random_matrix(&mut rnd,3,4,2.,3.);
    let r = random_matrix(&mut rnd,3,4,0.,1.);

    assert_gradient_close(&analytic_gradient(&c,&input,&r),&numeric_gradient(&c,&input,&r));
}

#[test]
fn test_history_terms() {
    let mut rnd = rng(24);
    let mut c = StreamingNormComponent::<f64>::new(2,2,0.001,1.,true).unwrap();

    train_step(&mut c,&mut rnd,8);

    assert_eq!(c.stats().count,8.);
    assert_eq!(c.moments().count,8.);

    c.refresh_derived();

    let derived = c.derived().unwrap().clone();
    let scale = &derived.transform.scale;

    for i in 0..2 {
        assert_relative_eq!(derived.x_deriv[i],-scale[i] * c.moments().deriv_sum[i] / 8.,max_relative = 1e-12);
        assert_relative_eq!(derived.scale_deriv[i],-scale[i] * c.moments().deriv_y_sum[i] / 8.,max_relative = 1e-12);
    }

    let input = random_matrix(&mut rnd,3,2,2.,3.);
    let (out,memo) = c.propagate(&input).unwrap();
    let mut memo = memo.unwrap();

    assert!(matches!(memo.indirect,IndirectTerms::FromHistory { .. }));
    assert_eq!(out,derived.transform.apply(&input));

    let dy = random_matrix(&mut rnd,3,2,0.,1.);
    let d = c.backprop(&input,&out,&dy,Some(&mut memo)).unwrap();

    for row in 0..3 {
        for i in 0..2 {
            let expected = dy[(row,i)] * scale[i] + derived.x_deriv[i] + out[(row,i)] * derived.scale_deriv[i];

            assert_relative_eq!(d[(row,i)],expected,max_relative = 1e-12);
        }
    }

    let moments = memo.moments.as_ref().unwrap();

    assert_eq!(moments.count,3.);
    assert_relative_eq!(moments.deriv_sum[0],dy[(0,0)] + dy[(1,0)] + dy[(2,0)],max_relative = 1e-12);
}

#[test]
fn test_forward_uses_history_prior_to_call() {
    let mut rnd = rng(25);
    let mut c = StreamingNormComponent::<f64>::new(3,1,0.001,1.,true).unwrap();

    train_step(&mut c,&mut rnd,4);

    let history = c.stats().derive(c.epsilon(),c.target_rms());
    let input = random_matrix(&mut rnd,2,3,0.,1.);

    let (out,memo) = c.propagate(&input).unwrap();

    assert_eq!(out,history.apply(&input));

    c.store_stats(&input,&out,memo.as_ref()).unwrap();

    assert_eq!(c.stats().count,4. * 3. + 2. * 3.);
    assert!(c.derived().is_none());
}

#[test]
fn test_mode_and_reset() {
    let mut rnd = rng(26);
    let mut c = StreamingNormComponent::<f64>::new(4,4,0.001,1.,true).unwrap();

    assert!(c.set_test_mode(true).is_err());

    train_step(&mut c,&mut rnd,5);

    c.set_test_mode(true).unwrap();

    assert!(c.derived().is_some());
    assert!(!c.properties().backprop_needs_output);
    assert!(!c.properties().uses_memo);

    let input = random_matrix(&mut rnd,3,4,0.,1.);
    let before = c.clone();
    let (o1,_) = c.propagate(&input).unwrap();
    let (o2,_) = c.propagate(&input).unwrap();

    assert_eq!(o1,o2);
    assert_eq!(c,before);

    c.scale(-1.);

    assert_eq!(c.stats().count,0.);
    assert_eq!(c.moments().count,0.);
    assert!(c.derived().is_none());
    assert!(c.propagate(&input).is_err());

    c.set_test_mode(false).unwrap();

    let (out,memo) = c.propagate(&input).unwrap();

    assert_all_finite(&out);
    assert!(matches!(memo.unwrap().indirect,IndirectTerms::FromMinibatch));
}

#[test]
fn test_negative_add_is_ignored() {
    let mut rnd = rng(27);
    let mut c = StreamingNormComponent::<f64>::new(2,1,0.001,1.,true).unwrap();
    let mut other = c.clone();

    train_step(&mut other,&mut rnd,3);

    c.add(-1.,&other).unwrap();
    assert_eq!(c.stats().count,0.);

    c.add(2.,&other).unwrap();
    assert_eq!(c.stats().count,12.);
    assert_eq!(c.moments().count,12.);

    let wrong = StreamingNormComponent::<f64>::new(2,2,0.001,1.,true).unwrap();

    assert!(c.add(1.,&wrong).is_err());
}
