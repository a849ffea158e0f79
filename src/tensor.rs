//! Tensor Storage for Layer Math
//!
//! This module provides the one data structure every layer works on: a dense,
//! row-major array of `f64` with a fixed shape.
//!
//! ## Core Concepts
//!
//! - **Data**: Flat `Vec<f64>` storing all elements in row-major order
//! - **Shape**: Dimensions of the tensor (e.g., `[N, D]` or `[N, C, H, W]`)
//! - **Strides**: Step sizes for each dimension to compute flat indices
//!
//! Values are `f64` so that centred finite differences can verify analytic
//! gradients to relative errors around 1e-7 and below.
//!
//! ## Example
//!
//! ```rust
//! use convnet_layers::Tensor;
//!
//! // Create a 2x3 matrix
//! let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let tensor = Tensor::new(data, vec![2, 3]);
//!
//! // Matrix multiplication
//! let other = Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]);
//! let result = tensor.matmul(&other);
//! assert_eq!(result.shape, vec![2, 2]);
//! ```
//!
//! ## Parallelism
//!
//! Element-wise maps and matrix rows are processed with Rayon. Every output
//! element is still computed by a single sequential loop, so results do not
//! depend on thread scheduling.

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;

/// A multi-dimensional array for layer computations
///
/// # Memory Layout
///
/// For shape `[2, 3]`, data is stored as: `[row0_col0, row0_col1, row0_col2, row1_col0, row1_col1, row1_col2]`
///
/// Strides would be `[3, 1]` meaning:
/// - Moving one step in dimension 0 (rows) advances 3 positions in data
/// - Moving one step in dimension 1 (cols) advances 1 position in data
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    /// Flat storage of all tensor elements
    pub data: Vec<f64>,
    /// Shape of the tensor (dimensions)
    pub shape: Vec<usize>,
    /// Strides for each dimension (computed from shape)
    pub strides: Vec<usize>,
}

impl Tensor {
    /// Create a new tensor with given data and shape
    ///
    /// # Panics
    ///
    /// Panics if the product of shape dimensions doesn't equal data length
    ///
    /// # Example
    ///
    /// ```rust
    /// # use convnet_layers::Tensor;
    /// let tensor = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// assert_eq!(tensor.shape, vec![2, 2]);
    /// ```
    pub fn new(data: Vec<f64>, shape: Vec<usize>) -> Self {
        let expected_size: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_size,
            "Data length ({}) doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_size
        );

        let strides = Self::compute_strides(&shape);
        Self {
            data,
            shape,
            strides,
        }
    }

    /// Create a tensor filled with zeros
    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, 0.0)
    }

    /// Create a tensor filled with ones
    pub fn ones(shape: Vec<usize>) -> Self {
        Self::full(shape, 1.0)
    }

    /// Create a tensor with every element set to `value`
    pub fn full(shape: Vec<usize>, value: f64) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![value; size], shape)
    }

    /// Zeros with the same shape as `self`
    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.shape.clone())
    }

    /// Ones with the same shape as `self`
    pub fn ones_like(&self) -> Self {
        Self::ones(self.shape.clone())
    }

    /// Build a tensor from a function of the flat index
    ///
    /// ```rust
    /// # use convnet_layers::Tensor;
    /// let t = Tensor::from_fn(vec![2, 2], |i| i as f64);
    /// assert_eq!(t.data, vec![0.0, 1.0, 2.0, 3.0]);
    /// ```
    pub fn from_fn(shape: Vec<usize>, f: impl FnMut(usize) -> f64) -> Self {
        let size: usize = shape.iter().product();
        Self::new((0..size).map(f).collect(), shape)
    }

    /// Evenly spaced values from `start` to `end` (both inclusive), laid out
    /// in row-major order over `shape`
    ///
    /// Handy for deterministic fixtures.
    ///
    /// ```rust
    /// # use convnet_layers::Tensor;
    /// let t = Tensor::linspace(-1.0, 1.0, vec![5]);
    /// assert_eq!(t.data, vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
    /// ```
    pub fn linspace(start: f64, end: f64, shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        if size <= 1 {
            return Self::full(shape, start);
        }
        let step = (end - start) / (size - 1) as f64;
        Self::from_fn(shape, |i| start + step * i as f64)
    }

    /// Standard-normal samples drawn from `rng`
    pub fn randn<R: Rng + ?Sized>(shape: Vec<usize>, rng: &mut R) -> Self {
        Self::from_fn(shape, |_| StandardNormal.sample(&mut *rng))
    }

    /// Compute strides from shape (row-major layout)
    ///
    /// For shape `[d0, d1, d2]`, strides are `[d1*d2, d2, 1]`
    fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the tensor holds no elements
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// The `(N, C, H, W)` dimensions of a 4-D tensor
    pub fn dims4(&self) -> Option<(usize, usize, usize, usize)> {
        match self.shape[..] {
            [n, c, h, w] => Some((n, c, h, w)),
            _ => None,
        }
    }

    /// Flat offset of element `[n, c, h, w]` in a 4-D tensor
    #[inline]
    pub fn offset4(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        n * self.strides[0] + c * self.strides[1] + h * self.strides[2] + w * self.strides[3]
    }

    /// Element `[n, c, h, w]` of a 4-D tensor
    #[inline]
    pub fn at4(&self, n: usize, c: usize, h: usize, w: usize) -> f64 {
        self.data[self.offset4(n, c, h, w)]
    }

    /// Element `[i, j]` of a 2-D tensor
    #[inline]
    pub fn at2(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.strides[0] + j]
    }

    /// 2-D matrix multiplication
    ///
    /// For `A @ B` where `A` is `[m, k]` and `B` is `[k, n]`:
    /// - Result shape: `[m, n]`
    /// - Each element `C[i,j] = sum(A[i,l] * B[l,j])` for all l
    ///
    /// Output rows are computed in parallel; inside a row the inner dimension
    /// is accumulated in order `l = 0..k`.
    ///
    /// # Panics
    ///
    /// Panics if either operand is not 2-D or the inner dimensions differ
    ///
    /// # Example
    ///
    /// ```rust
    /// # use convnet_layers::Tensor;
    /// let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// let b = Tensor::new(vec![1.0, 0.0, 0.0, 1.0], vec![2, 2]);
    /// let c = a.matmul(&b);
    /// assert_eq!(c.data, a.data);
    /// ```
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert!(
            self.ndim() == 2 && other.ndim() == 2,
            "Unsupported matmul shapes: {:?} @ {:?}",
            self.shape,
            other.shape
        );
        assert_eq!(
            self.shape[1], other.shape[0],
            "Matrix dimensions incompatible: [{}, {}] @ [{}, {}]",
            self.shape[0], self.shape[1], other.shape[0], other.shape[1]
        );

        let m = self.shape[0];
        let k = self.shape[1];
        let n = other.shape[1];

        let mut result = vec![0.0; m * n];
        if n == 0 {
            return Tensor::new(result, vec![m, n]);
        }

        result.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
            for l in 0..k {
                let a_val = self.data[i * k + l];
                let b_row = &other.data[l * n..(l + 1) * n];
                for (r, &b_val) in row.iter_mut().zip(b_row) {
                    *r += a_val * b_val;
                }
            }
        });

        Tensor::new(result, vec![m, n])
    }

    /// Transpose a 2-D matrix
    ///
    /// ```rust
    /// # use convnet_layers::Tensor;
    /// let t = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
    /// let tt = t.transpose();
    /// assert_eq!(tt.shape, vec![3, 2]);
    /// assert_eq!(tt.data, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    /// ```
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "transpose expects a 2-D tensor");
        let rows = self.shape[0];
        let cols = self.shape[1];
        let mut result = vec![0.0; rows * cols];

        for i in 0..rows {
            for j in 0..cols {
                result[j * rows + i] = self.data[i * cols + j];
            }
        }

        Tensor::new(result, vec![cols, rows])
    }

    /// Reshape tensor to new shape
    ///
    /// Total number of elements must remain the same.
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        let new_size: usize = new_shape.iter().product();
        assert_eq!(
            self.data.len(),
            new_size,
            "Cannot reshape {:?} to {:?}: element count mismatch",
            self.shape,
            new_shape
        );
        Tensor::new(self.data.clone(), new_shape.to_vec())
    }

    /// View `(N, d_1, ..., d_k)` as `(N, d_1 * ... * d_k)`
    ///
    /// ```rust
    /// # use convnet_layers::Tensor;
    /// let x = Tensor::zeros(vec![2, 3, 4]);
    /// assert_eq!(x.flatten_batch().shape, vec![2, 12]);
    /// ```
    pub fn flatten_batch(&self) -> Tensor {
        let n = self.shape.first().copied().unwrap_or(0);
        let d = self.shape.iter().skip(1).product();
        self.reshape(&[n, d])
    }

    /// Apply `f` to every element
    pub fn map(&self, f: impl Fn(f64) -> f64 + Sync + Send) -> Tensor {
        let result = self.data.par_iter().map(|&x| f(x)).collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Combine two same-shaped tensors element by element
    pub fn zip_map(&self, other: &Tensor, f: impl Fn(f64, f64) -> f64 + Sync + Send) -> Tensor {
        assert_eq!(
            self.shape, other.shape,
            "Shapes must match for element-wise op"
        );
        let result = self
            .data
            .par_iter()
            .zip(&other.data)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Element-wise op with support for broadcasting a 1-D tensor along the
    /// last dimension (`[*, n] op [n]`)
    fn broadcast_op(&self, other: &Tensor, name: &str, f: impl Fn(f64, f64) -> f64 + Sync + Send) -> Tensor {
        if self.shape == other.shape {
            return self.zip_map(other, f);
        }

        // A zero-width last dimension leaves `self` empty, so `i % last_dim` never runs
        let last_dim = self.shape.last().copied().unwrap_or(0);
        if self.ndim() > 0 && other.ndim() == 1 && other.len() == last_dim {
            let result = self
                .data
                .par_iter()
                .enumerate()
                .map(|(i, &a)| f(a, other.data[i % last_dim]))
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        panic!(
            "Unsupported broadcast for {}: {:?} and {:?}",
            name, self.shape, other.shape
        );
    }

    /// Element-wise addition, `[*, n] + [n]` broadcasts (e.g., bias addition)
    ///
    /// ```rust
    /// # use convnet_layers::Tensor;
    /// let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// let b = Tensor::new(vec![10.0, 20.0], vec![2]);
    /// assert_eq!(a.add(&b).data, vec![11.0, 22.0, 13.0, 24.0]);
    /// ```
    pub fn add(&self, other: &Tensor) -> Tensor {
        self.broadcast_op(other, "add", |a, b| a + b)
    }

    /// Element-wise subtraction, `[*, n] - [n]` broadcasts
    pub fn sub(&self, other: &Tensor) -> Tensor {
        self.broadcast_op(other, "sub", |a, b| a - b)
    }

    /// Element-wise multiplication, `[*, n] * [n]` broadcasts
    pub fn mul(&self, other: &Tensor) -> Tensor {
        self.broadcast_op(other, "mul", |a, b| a * b)
    }

    /// Multiply all elements by scalar
    pub fn scale(&self, scalar: f64) -> Tensor {
        self.map(|x| x * scalar)
    }

    /// Column sums of a 2-D tensor: `[n, d] -> [d]`
    ///
    /// Rows are added in order, matching `np.sum(x, axis=0)` on small inputs.
    pub fn sum_rows(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "sum_rows expects a 2-D tensor");
        let d = self.shape[1];
        let mut sums = vec![0.0; d];
        for row in self.data.chunks(d.max(1)) {
            for (s, &v) in sums.iter_mut().zip(row) {
                *s += v;
            }
        }
        Tensor::new(sums, vec![d])
    }

    /// Sum of all elements
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Largest absolute element (0 for an empty tensor)
    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0, |m, &x| m.max(x.abs()))
    }
}
