use ambit_optimize::calculus::*;
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};

#[test]
fn approximate_jacobian_simple_function() {
    struct SimpleTwoDimensionalPolynomial;

    impl VectorFunction<f64> for SimpleTwoDimensionalPolynomial {
        fn dimension(&self) -> usize {
            2
        }

        fn eval_into(&mut self, f: &mut DVectorViewMut<f64>, x: &DVectorView<f64>) {
            assert_eq!(x.len(), 2);
            assert_eq!(f.len(), x.len());
            let x1 = x[0];
            let x2 = x[1];
            f[0] = x1 * x2 + 3.0;
            f[1] = x1 * x1 + x2 * x2 + x1 + 5.0;
        }
    }

    let h = 1e-6;
    let x = DVector::from_column_slice(&[3.0, 4.0]);
    let j = approximate_jacobian(SimpleTwoDimensionalPolynomial, &x, &h);

    // J = [   x2           x1 ]
    //     [ 2*x1 + 1     2*x2 ]

    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(2, 2,
                                           &[4.0, 3.0,
                                             7.0, 8.0]);

    assert_matrix_eq!(j, expected, comp = abs, tol = 1e-6);
}

#[test]
fn test_approximate_gradient_fd() {
    let f = |x: DVectorView<f64>| {
        let (x, y, z) = (x[0], x[1], x[2]);
        3.0 * x * x * x + 3.0 * x * y - 5.0 * z * z + 2.0
    };
    let f_grad = |x: &DVector<f64>| {
        let (x, y, z) = (x[0], x[1], x[2]);
        DVector::from_column_slice(&[9.0 * x * x + 3.0 * y, 3.0 * x, -10.0 * z])
    };

    let mut x = DVector::from_column_slice(&[3.0, 4.0, 5.0]);
    let f_grad_fd = approximate_gradient_fd(f, &mut x, 1e-6);

    assert_matrix_eq!(f_grad_fd, f_grad(&x), comp = abs, tol = 1e-5);
    // x is restored after differentiation
    assert_matrix_eq!(x, DVector::from_column_slice(&[3.0, 4.0, 5.0]));
}

#[test]
fn test_approximate_jacobian_fd() {
    let f = |x: DVectorView<f64>, mut f: DVectorViewMut<f64>| {
        f[0] = x[0] * x[1];
        f[1] = x[1].exp();
        f[2] = x[0] - 2.0 * x[1];
    };

    let mut x = DVector::from_column_slice(&[2.0, 0.5]);
    let j = approximate_jacobian_fd(3, f, &mut x, 1e-6);

    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(3, 2,
                                           &[0.5, 2.0,
                                             0.0, 0.5f64.exp(),
                                             1.0, -2.0]);
    assert_matrix_eq!(j, expected, comp = abs, tol = 1e-6);
}

#[test]
fn solve_dense_shifted_adds_shift_to_diagonal() {
    #[rustfmt::skip]
    let jacobian = DMatrix::from_row_slice(2, 2,
                                           &[2.0, 1.0,
                                             0.0, 3.0]);
    let rhs = DVector::from_column_slice(&[4.0, 8.0]);
    let mut sol = DVector::zeros(2);

    solve_dense_shifted(&jacobian, 1.0, &mut DVectorViewMut::from(&mut sol), &DVectorView::from(&rhs)).unwrap();

    // (J + I) = [3 1; 0 4]
    assert_matrix_eq!(sol, DVector::from_column_slice(&[2.0 / 3.0, 2.0]), comp = abs, tol = 1e-12);
}

#[test]
fn solve_dense_shifted_reports_singular_matrix() {
    let jacobian = DMatrix::<f64>::zeros(2, 2);
    let rhs = DVector::from_column_slice(&[1.0, 1.0]);
    let mut sol = DVector::zeros(2);
    let result = solve_dense_shifted(&jacobian, 0.0, &mut DVectorViewMut::from(&mut sol), &DVectorView::from(&rhs));
    assert!(result.is_err());
}
