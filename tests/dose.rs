use approx::assert_relative_eq;
use blooddvh::prelude::*;
use ndarray::Array2;

/// Every particle resident in organ 0 for `nsteps` steps of one second
fn resident(nparticles: usize, nsteps: usize) -> BloodDistribution {
    BloodDistribution::from_parts(
        Array2::zeros((nparticles, nsteps)),
        1.0,
        vec!["liver".into(), "body".into()],
        5.3,
    )
    .unwrap()
}

fn schedule() -> Tdvh {
    Tdvh::from_segments([
        (10.0, Some(DoseRate::Function(|_| 2.0))),
        (10.0, None),
        (10.0, Some(DoseRate::Function(|_| 5.0))),
    ])
    .unwrap()
}

#[test]
fn schedule_dose_on_resident_particles() {
    let blood = resident(8, 40);
    let mut bdvh = Bdvh::new(&blood);
    bdvh.add_dose(&schedule(), 0, 0.0).unwrap();
    for &dose in bdvh.dose().iter() {
        assert_relative_eq!(dose, 70.0, epsilon = 1e-12);
    }
}

#[test]
fn repeated_schedule_stacks_linearly() {
    let blood = resident(8, 60);
    let mut bdvh = Bdvh::new(&blood);
    bdvh.add_dose(&schedule(), 0, 0.0).unwrap();
    bdvh.add_dose(&schedule(), 0, 20.0).unwrap();
    for &dose in bdvh.dose().iter() {
        assert_relative_eq!(dose, 140.0, epsilon = 1e-12);
    }
}

#[test]
fn overlapping_windows_are_counted_twice() {
    let blood = resident(4, 20);
    let tdvh = Tdvh::from_segments([(10.0, Some(DoseRate::Constant(2.0)))]).unwrap();
    let mut bdvh = Bdvh::new(&blood);
    bdvh.add_dose(&tdvh, 0, 0.0).unwrap();
    bdvh.add_dose(&tdvh, 0, 0.0).unwrap();
    for &dose in bdvh.dose().iter() {
        assert_relative_eq!(dose, 40.0, epsilon = 1e-12);
    }
}

#[test]
fn other_organ_receives_nothing() {
    let blood = resident(4, 40);
    let mut bdvh = Bdvh::new(&blood);
    bdvh.add_dose(&schedule(), 1, 0.0).unwrap();
    assert!(bdvh.dose().iter().all(|&d| d == 0.0));
}

#[test]
fn idle_schedule_leaves_zero_dose() {
    let markov = TransitionMatrix::from_rows(&[vec![0.6, 0.4], vec![0.5, 0.5]]).unwrap();
    let options = SimulationOptions::at_resolution(200, 60.0, 60.0).with_seed(3);
    let blood =
        BloodDistribution::generate_from_markov(&markov, vec!["a".into(), "b".into()], 5.3, &options)
            .unwrap();
    let idle = Tdvh::from_segments([(15.0, None), (30.0, None)]).unwrap();

    let mut bdvh = Bdvh::new(&blood);
    bdvh.add_dose(&idle, 0, 0.0).unwrap();
    bdvh.add_dose(&idle, 1, 12.5).unwrap();
    assert!(bdvh.dose().iter().all(|&d| d == 0.0));
}

#[test]
fn disjoint_windows_are_additive() {
    let markov = TransitionMatrix::from_rows(&[
        vec![0.7, 0.2, 0.1],
        vec![0.3, 0.6, 0.1],
        vec![0.2, 0.2, 0.6],
    ])
    .unwrap();
    let options = SimulationOptions::at_resolution(500, 120.0, 60.0).with_seed(17);
    let names = vec!["liver".into(), "spleen".into(), "body".into()];
    let blood = BloodDistribution::generate_from_markov(&markov, names, 5.3, &options).unwrap();

    let first = Tdvh::from_segments([(12.0, Some(DoseRate::Constant(0.3)))]).unwrap();
    let second = Tdvh::from_segments([
        (5.0, Some(DoseRate::PerOrgan(vec![0.0, 1.5, 0.0]))),
        (5.0, None),
        (5.0, Some(DoseRate::Constant(0.1))),
    ])
    .unwrap();

    let mut combined = Bdvh::new(&blood);
    combined.add_dose(&first, 0, 0.0).unwrap();
    combined.add_dose(&second, 1, 20.0).unwrap();

    let mut alone_first = Bdvh::new(&blood);
    alone_first.add_dose(&first, 0, 0.0).unwrap();
    let mut alone_second = Bdvh::new(&blood);
    alone_second.add_dose(&second, 1, 20.0).unwrap();

    let expected = alone_first.dose() + alone_second.dose();
    for (c, e) in combined.dose().iter().zip(expected.iter()) {
        assert_relative_eq!(*c, *e, epsilon = 1e-12);
    }
    assert!(combined.mean_dose() > 0.0);
}

#[test]
fn dose_is_monotone_in_calls() {
    let markov = TransitionMatrix::from_rows(&[vec![0.5, 0.5], vec![0.5, 0.5]]).unwrap();
    let options = SimulationOptions::at_resolution(100, 60.0, 30.0).with_seed(21);
    let blood =
        BloodDistribution::generate_from_markov(&markov, vec!["a".into(), "b".into()], 5.3, &options)
            .unwrap();
    let tdvh = Tdvh::from_segments([(10.0, Some(DoseRate::Constant(1.0)))]).unwrap();

    let mut bdvh = Bdvh::new(&blood);
    bdvh.add_dose(&tdvh, 0, 0.0).unwrap();
    let before = bdvh.dose().clone();
    bdvh.add_dose(&tdvh, 1, 5.0).unwrap();
    assert!(bdvh.dose().iter().zip(before.iter()).all(|(a, b)| a >= b));

    // Particles spend about half of the ten steps in [5, 15) in organ 1
    let total: f64 = bdvh.dose().sum() - before.sum();
    assert_relative_eq!(total / 100.0, 10.0 * 0.5, epsilon = 1.0);
}

#[test]
fn finer_resolution_integrates_same_schedule() {
    let coarse = resident(2, 30);
    let fine = BloodDistribution::from_parts(
        Array2::zeros((2, 300)),
        0.1,
        vec!["liver".into(), "body".into()],
        5.3,
    )
    .unwrap();

    let mut a = Bdvh::new(&coarse);
    let mut b = Bdvh::new(&fine);
    a.add_dose(&schedule(), 0, 0.0).unwrap();
    b.add_dose(&schedule(), 0, 0.0).unwrap();
    assert_relative_eq!(a.dose()[0], b.dose()[0], epsilon = 1e-9);
}

#[test]
fn histogram_of_population_doses() {
    let mut occupancy = Array2::zeros((4, 10));
    // Two particles leave the irradiated organ halfway through
    for p in 2..4 {
        for t in 5..10 {
            occupancy[[p, t]] = 1;
        }
    }
    let blood =
        BloodDistribution::from_parts(occupancy, 1.0, vec!["liver".into(), "body".into()], 4.0)
            .unwrap();
    let tdvh = Tdvh::from_segments([(10.0, Some(DoseRate::Constant(1.0)))]).unwrap();
    let mut bdvh = Bdvh::new(&blood);
    bdvh.add_dose(&tdvh, 0, 0.0).unwrap();
    assert_eq!(bdvh.dose().to_vec(), vec![10.0, 10.0, 5.0, 5.0]);

    let dvh = bdvh.histogram(5.0).unwrap();
    assert_eq!(dvh.counts(), &[0, 2, 2]);
    assert_eq!(dvh.cumulative(), vec![1.0, 1.0, 0.5]);
    assert_eq!(dvh.volumes(blood.total_blood_volume()), vec![0.0, 2.0, 2.0]);
}
