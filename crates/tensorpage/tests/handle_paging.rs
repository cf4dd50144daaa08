use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{ensure, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tensorpage::io::block;
use tensorpage::tensor::{DType, Shape, Tensor};
use tensorpage::{PagedOps, PagedTensor, Residency};

fn unique_path(prefix: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_nanos();
    path.push(format!("{prefix}_{nanos}.bin"));
    path
}

struct TempFile {
    path: PathBuf,
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn ensure_bit_equal(lhs: &[f32], rhs: &[f32]) -> Result<()> {
    ensure!(lhs.len() == rhs.len(), "lengths differ");
    for (i, (a, b)) in lhs.iter().zip(rhs.iter()).enumerate() {
        ensure!(
            a.to_bits() == b.to_bits(),
            "element {} differs: {} vs {}",
            i,
            a,
            b
        );
    }
    Ok(())
}

#[test]
fn release_then_load_reproduces_contents() -> Result<()> {
    let f = TempFile {
        path: unique_path("tensorpage_handle_roundtrip"),
    };
    let mut rng = StdRng::seed_from_u64(0);
    let orig = Tensor::randn(Shape::new([128]), 1.0, &mut rng);

    let mut handle = PagedTensor::from_tensor(orig.clone());
    ensure!(handle.residency() == Residency::InMemory, "fresh handle must be resident");
    handle.set_file_params(&f.path, 0);
    handle.to_file(true)?;
    ensure!(handle.residency() == Residency::OnDisk, "release must drop the buffer");

    ensure_bit_equal(orig.data(), handle.to_tensor()?.data())?;
    ensure!(handle.is_resident(), "load must leave the handle resident");

    let total = handle.sum()?;
    ensure!(
        total.to_bits() == orig.sum().to_bits(),
        "sum through the handle must match the plain tensor"
    );
    Ok(())
}

#[test]
fn inplace_mutation_is_written_back_to_disk() -> Result<()> {
    let f = TempFile {
        path: unique_path("tensorpage_handle_inplace"),
    };
    let mut rng = StdRng::seed_from_u64(1);
    let orig = Tensor::randn(Shape::new([128]), 1.0, &mut rng);

    let mut handle = PagedTensor::from_tensor(orig.clone());
    handle.set_file_params(&f.path, 0);
    handle.to_file(true)?;

    // Load-on-demand, mutate, write back: the file is the source of truth
    // afterwards even though the handle keeps its resident copy.
    handle.add_assign_scalar(1.0)?;
    ensure!(handle.is_resident(), "in-place op must leave the handle resident");

    let mut fresh = PagedTensor::on_file(Shape::new([128]), DType::F32, &f.path, 0);
    let mut expected = orig.clone();
    expected.map_inplace(|v| v + 1.0);
    ensure_bit_equal(expected.data(), fresh.to_tensor()?.data())?;

    handle.mul_assign_scalar(2.0)?;
    let mut fresh = PagedTensor::on_file(Shape::new([128]), DType::F32, &f.path, 0);
    expected.map_inplace(|v| v * 2.0);
    ensure_bit_equal(expected.data(), fresh.to_tensor()?.data())
}

#[test]
fn out_of_place_ops_leave_disk_untouched() -> Result<()> {
    let f = TempFile {
        path: unique_path("tensorpage_handle_outofplace"),
    };
    let mut rng = StdRng::seed_from_u64(2);
    let orig = Tensor::randn(Shape::new([64]), 1.0, &mut rng);

    let mut handle = PagedTensor::from_tensor(orig.clone());
    handle.set_file_params(&f.path, 0);
    handle.to_file(true)?;

    let shifted = handle.add_scalar(1.0)?;
    let mut expected = orig.clone();
    expected.map_inplace(|v| v + 1.0);
    ensure_bit_equal(expected.data(), shifted.data())?;

    // The persisted region still holds the original values.
    let mut fresh = PagedTensor::on_file(Shape::new([64]), DType::F32, &f.path, 0);
    ensure_bit_equal(orig.data(), fresh.to_tensor()?.data())
}

#[test]
fn point_to_file_bypasses_the_cached_tensor() -> Result<()> {
    let f = TempFile {
        path: unique_path("tensorpage_handle_repoint"),
    };
    let mut rng = StdRng::seed_from_u64(3);
    let first = Tensor::randn(Shape::new([32]), 1.0, &mut rng);
    let second = Tensor::randn(Shape::new([32]), 1.0, &mut rng);
    let second_offset = first.byte_len() as u64;
    block::write(&second, &f.path, second_offset)?;

    let mut handle = PagedTensor::from_tensor(first.clone());
    handle.set_file_params(&f.path, 0);
    handle.to_file(false)?;
    ensure!(handle.is_resident(), "to_file without release keeps the buffer");

    handle.point_to_file(&f.path, second_offset);
    ensure!(
        handle.residency() == Residency::OnDisk,
        "point_to_file must discard the cached tensor"
    );
    ensure_bit_equal(second.data(), handle.to_tensor()?.data())
}

#[test]
fn to_file_without_association_fails() -> Result<()> {
    let mut handle = PagedTensor::from_tensor(Tensor::zeros(Shape::new([4])));
    ensure!(
        handle.to_file(false).is_err(),
        "to_file must require a file association"
    );
    Ok(())
}

#[test]
fn to_file_while_on_disk_fails() -> Result<()> {
    let f = TempFile {
        path: unique_path("tensorpage_handle_double_flush"),
    };
    let mut handle = PagedTensor::from_tensor(Tensor::ones(Shape::new([4])));
    handle.set_file_params(&f.path, 0);
    handle.to_file(true)?;
    ensure!(
        handle.to_file(false).is_err(),
        "to_file with nothing resident must fail"
    );
    Ok(())
}

#[test]
fn gradient_accumulation_matches_plain_tensor() -> Result<()> {
    let f = TempFile {
        path: unique_path("tensorpage_handle_grad"),
    };
    let mut rng = StdRng::seed_from_u64(4);
    let orig = Tensor::randn(Shape::new([4, 4]), 1.0, &mut rng);
    let delta_a = Tensor::randn(Shape::new([4, 4]), 1.0, &mut rng);
    let delta_b = Tensor::randn(Shape::new([4, 4]), 1.0, &mut rng);

    // Plain baseline through the substrate's own gradient buffer.
    let mut plain = orig.clone();
    plain.accumulate_grad(&delta_a)?;
    plain.accumulate_grad(&delta_b)?;

    let mut handle = PagedTensor::from_tensor(orig);
    handle.set_file_params(&f.path, 0);
    handle.to_file(true)?;

    handle.accumulate_grad(&delta_a)?;
    // Offloading the data between backward contributions must not disturb
    // the gradient buffer.
    handle.to_tensor()?;
    handle.to_file(true)?;
    handle.accumulate_grad(&delta_b)?;

    let grad = handle
        .grad_tensor()?
        .ok_or_else(|| anyhow::anyhow!("handle has no gradient after accumulation"))?;
    let plain_grad = plain
        .grad()
        .ok_or_else(|| anyhow::anyhow!("plain tensor has no gradient after accumulation"))?;
    ensure_bit_equal(plain_grad, grad.data())?;
    ensure!(
        handle.grad().is_some(),
        "gradient handle must persist after the snapshot"
    );
    plain.clear_grad();
    ensure!(plain.grad().is_none(), "clear_grad drops the plain buffer");

    handle.zero_grad()?;
    let cleared = handle
        .grad_tensor()?
        .ok_or_else(|| anyhow::anyhow!("gradient buffer vanished after zero_grad"))?;
    ensure!(
        cleared.data().iter().all(|&v| v == 0.0),
        "zero_grad must clear every element"
    );
    Ok(())
}

#[test]
fn offloaded_gradient_buffer_round_trips() -> Result<()> {
    let data_file = TempFile {
        path: unique_path("tensorpage_handle_grad_data"),
    };
    let grad_file = TempFile {
        path: unique_path("tensorpage_handle_grad_page"),
    };
    let mut rng = StdRng::seed_from_u64(5);
    let orig = Tensor::randn(Shape::new([8]), 1.0, &mut rng);
    let delta = Tensor::randn(Shape::new([8]), 1.0, &mut rng);

    let mut handle = PagedTensor::from_tensor(orig);
    handle.set_file_params(&data_file.path, 0);
    handle.to_file(true)?;

    // The gradient is a paged tensor of its own: give it a file region and
    // every accumulation flushes it.
    handle.ensure_grad().set_file_params(&grad_file.path, 0);
    handle.accumulate_grad(&delta)?;

    let grad = handle
        .grad_mut()
        .ok_or_else(|| anyhow::anyhow!("gradient handle missing"))?;
    grad.point_to_file(&grad_file.path, 0);
    ensure!(
        grad.residency() == Residency::OnDisk,
        "re-pointed gradient must drop its cache"
    );

    let reloaded = handle
        .grad_tensor()?
        .ok_or_else(|| anyhow::anyhow!("gradient handle missing after re-point"))?;
    ensure_bit_equal(delta.data(), reloaded.data())
}
