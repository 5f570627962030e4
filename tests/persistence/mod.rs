use std::fs;
use std::io::Cursor;
use nnnorm::arr::Matrix;
use nnnorm::component::{BatchNormComponent, Component, FixedScaleComponent, NormalizeComponent, StreamingNormComponent};
use nnnorm::persistence::{BinPersistence, Persistence, ReadPersistence, SaveToFile, TextPersistence};
use crate::common::{random_matrix, rng};

fn components() -> Vec<NormalizeComponent<f64>> {
    let mut rnd = rng(31);

    let mut bn = NormalizeComponent::from_config_str("type=BatchNormComponent dim=6 block-dim=2 target-rms=1.25").unwrap();
    let mut sn = NormalizeComponent::from_config_str("type=StreamingNormComponent dim=6 epsilon=0.01").unwrap();
    let fs = NormalizeComponent::from_config_str("type=FixedScaleComponent dim=6 block-dim=3 add-log-stddev=true").unwrap();

    for _ in 0..3 {
        for c in [&mut bn,&mut sn] {
            let input = random_matrix(&mut rnd,5,6,0.7,1.3);
            let (out,mut memo) = c.propagate(&input).unwrap();
            let dy = random_matrix(&mut rnd,5,6,0.,1.);

            c.backprop(&input,&out,&dy,memo.as_mut()).unwrap();
            c.store_stats(&input,&out,memo.as_ref()).unwrap();
        }
    }

    let mut bn_test = bn.clone();
    bn_test.set_test_mode(true).unwrap();

    let mut sn_test = sn.clone();
    sn_test.set_test_mode(true).unwrap();

    vec![fs,bn,sn,bn_test,sn_test]
}

fn assert_same_behavior(l:&NormalizeComponent<f64>,r:&NormalizeComponent<f64>) {
    let mut rnd = rng(32);
    let input = random_matrix(&mut rnd,4,6,0.,2.);

    assert_eq!(l.type_name(),r.type_name());
    assert_eq!(l.test_mode(),r.test_mode());
    assert_eq!(l.info(),r.info());

    let (lo,mut lm) = l.propagate(&input).unwrap();
    let (ro,mut rm) = r.propagate(&input).unwrap();

    assert_eq!(lo,ro);

    let dy = random_matrix(&mut rnd,4,l.output_dim(),0.,1.);

    assert_eq!(l.backprop(&input,&lo,&dy,lm.as_mut()).unwrap(),r.backprop(&input,&ro,&dy,rm.as_mut()).unwrap());
}

#[test]
fn test_text_round_trip() {
    let components = components();
    let mut w = TextPersistence::<f64,_>::writer();

    for c in components.iter() {
        c.save(&mut w).unwrap();
    }

    let mut buf = Vec::new();
    w.save_to(&mut buf).unwrap();

    let mut r = TextPersistence::<f64,_>::new(Cursor::new(buf));

    for c in components.iter() {
        let loaded = NormalizeComponent::read(&mut r).unwrap();

        assert_same_behavior(c,&loaded);
    }

    r.verify_eof().unwrap();
}

#[test]
fn test_binary_round_trip() {
    let components = components();
    let mut w = BinPersistence::<f64,_>::writer();

    for c in components.iter() {
        c.save(&mut w).unwrap();
    }

    let mut buf = Vec::new();
    w.save_to(&mut buf).unwrap();

    let mut r = BinPersistence::<f64,_>::new(Cursor::new(buf));

    for c in components.iter() {
        let loaded = NormalizeComponent::read(&mut r).unwrap();

        assert_same_behavior(c,&loaded);
    }

    r.verify_eof().unwrap();
}

#[test]
fn test_round_trip_keeps_state() {
    let mut rnd = rng(33);
    let mut c = StreamingNormComponent::<f64>::new(4,2,0.001,1.,true).unwrap();

    for _ in 0..2 {
        let input = random_matrix(&mut rnd,3,4,1.,1.);
        let (out,mut memo) = c.propagate(&input).unwrap();

        c.backprop(&input,&out,&random_matrix(&mut rnd,3,4,0.,1.),memo.as_mut()).unwrap();
        c.store_stats(&input,&out,memo.as_ref()).unwrap();
    }

    c.refresh_derived();

    let mut w = TextPersistence::<f64,_>::writer();
    c.save(&mut w).unwrap();

    let mut buf = Vec::new();
    w.save_to(&mut buf).unwrap();

    let mut loaded = StreamingNormComponent::default();
    loaded.load(&mut TextPersistence::<f64,_>::new(Cursor::new(buf))).unwrap();

    assert_eq!(loaded,c);
}

#[test]
fn test_type_tag_mismatch() {
    let c = FixedScaleComponent::<f32>::new(4,2,1.,false).unwrap();

    let mut w = TextPersistence::<f32,_>::writer();
    c.save(&mut w).unwrap();

    let mut buf = Vec::new();
    w.save_to(&mut buf).unwrap();

    let mut bn = BatchNormComponent::<f32>::default();

    assert!(bn.load(&mut TextPersistence::<f32,_>::new(Cursor::new(buf.clone()))).is_err());

    let mut fs = FixedScaleComponent::<f32>::default();

    assert!(fs.load(&mut TextPersistence::<f32,_>::new(Cursor::new(buf))).is_ok());
    assert_eq!(fs,c);

    let mut r = TextPersistence::<f32,_>::new(Cursor::new(b"<NoSuchComponent> <Dim> 3".to_vec()));

    assert!(NormalizeComponent::read(&mut r).is_err());
}

#[test]
fn test_truncated_input() {
    let c = BatchNormComponent::<f64>::new(2,2,0.001,1.).unwrap();

    let mut w = BinPersistence::<f64,_>::writer();
    c.save(&mut w).unwrap();

    let mut buf = Vec::new();
    w.save_to(&mut buf).unwrap();
    buf.truncate(buf.len() - 3);

    let mut r = BinPersistence::<f64,_>::new(Cursor::new(buf));

    assert!(NormalizeComponent::read(&mut r).is_err());
}

#[test]
fn test_save_to_file() {
    let c = NormalizeComponent::<f32>::from_config_str("type=BatchNormComponent dim=4 block-dim=2").unwrap();
    let path = std::env::temp_dir().join(format!("nnnorm-test-{}.txt",std::process::id()));

    let mut w = TextPersistence::<f32,_>::writer();
    c.save(&mut w).unwrap();
    SaveToFile::save(&w,&path).unwrap();

    let mut r = TextPersistence::<f32,_>::from_file(&path).unwrap();
    let loaded = NormalizeComponent::read(&mut r).unwrap();

    r.verify_eof().unwrap();
    fs::remove_file(&path).unwrap();

    assert_eq!(loaded.input_dim(),4);
    assert_eq!(loaded.type_name(),"BatchNormComponent");

    let (out,_) = loaded.propagate(&Matrix::from_vec(2,4,vec![1.,2.,3.,4.,5.,6.,7.,8.]).unwrap()).unwrap();

    assert_eq!(out.rows(),2);
}
