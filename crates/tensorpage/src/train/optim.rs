use crate::paging::PagedOps;
use anyhow::Result;

/// Optimizers see paged parameters only through [`PagedOps`], so a step is
/// transparent over plain handles and flat aggregates alike: reads load on
/// demand and updates are written back to disk before `step` returns.
pub trait Optimizer {
    fn step(&mut self, params: &mut [&mut dyn PagedOps]) -> Result<()>;

    fn zero_grad(&mut self, params: &mut [&mut dyn PagedOps]) -> Result<()> {
        for p in params.iter_mut() {
            p.zero_grad()?;
        }
        Ok(())
    }
}

/// Plain stochastic gradient descent: `p += -lr * grad`.
pub struct Sgd {
    pub lr: f32,
}

impl Sgd {
    pub fn new(lr: f32) -> Self {
        Sgd { lr }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [&mut dyn PagedOps]) -> Result<()> {
        for p in params.iter_mut() {
            let grad = match p.grad_tensor()? {
                Some(grad) => grad,
                None => continue,
            };
            p.add_scaled(&grad, -self.lr)?;
        }
        Ok(())
    }
}
