use crate::HyperelasticMaterial;
use ambit_traits::{inverse_transpose, outer, Real};
use nalgebra::{Matrix3, Vector3};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LameParameters<T> {
    pub mu: T,
    pub lambda: T,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct YoungPoisson<T> {
    pub young: T,
    pub poisson: T,
}

impl<T> From<YoungPoisson<T>> for LameParameters<T>
where
    T: Real,
{
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    fn from(params: YoungPoisson<T>) -> Self {
        let YoungPoisson { young, poisson } = params;
        let mu = 0.5 * young / (1.0 + poisson);
        let lambda = 2.0 * mu * poisson / (1.0 - 2.0 * poisson);
        Self { mu, lambda }
    }
}

/// Returns $\vec F^{-T}$, or a matrix of NaNs for singular $\vec F$.
///
/// Inverted elements then show up as a non-finite residual, which the Newton solver reports as
/// divergence.
#[allow(non_snake_case)]
fn inverse_transpose_or_nan<T: Real>(F: &Matrix3<T>) -> Matrix3<T> {
    inverse_transpose(F).unwrap_or_else(|| Matrix3::repeat(T::zero() / T::zero()))
}

/// The compressible Neo-Hookean material model.
///
/// The strain energy density is given by
/// $$
/// \psi(\vec F) = \frac{\mu}{2}(I_C - 3) - \mu \log J + \frac{\lambda}{2}(\log J)^2,
/// $$
/// where $J = \det \vec F$ and $I_C = \tr{\vec C} = \tr{\vec F^T \vec F}$ is the first right Cauchy-Green invariant.
/// The stress tensor is
/// $$
/// \vec P(\vec F) = \mu (\vec F - \vec F^{-T}) + \lambda \log J \\, \vec F^{-T}
/// $$
/// and the contraction operator is
/// $$
/// \mathcal{C}_{\vec P}(\vec F, \vec a, \vec b) =
///     \mu (\vec a \cdot \vec b) \vec I
///     + (\mu - \lambda \log J) (\vec F^{-T} \vec b) (\vec F^{-T} \vec a)^T
///     + \lambda (\vec F^{-T} \vec a) (\vec F^{-T} \vec b)^T.
/// $$
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeoHookeanMaterial;

#[allow(non_snake_case)]
#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
impl<T> HyperelasticMaterial<T> for NeoHookeanMaterial
where
    T: Real,
{
    type Parameters = LameParameters<T>;

    fn compute_energy_density(&self, deformation_gradient: &Matrix3<T>, parameters: &Self::Parameters) -> T {
        let &LameParameters { mu, lambda } = parameters;
        let F = deformation_gradient;
        let log_J = F.determinant().ln();
        let I_C = F.norm_squared();
        0.5 * mu * (I_C - 3.0) - mu * log_J + 0.5 * lambda * log_J * log_J
    }

    fn compute_stress_tensor(&self, deformation_gradient: &Matrix3<T>, parameters: &Self::Parameters) -> Matrix3<T> {
        let &LameParameters { mu, lambda } = parameters;
        let F = deformation_gradient;
        let F_inv_t = inverse_transpose_or_nan(F);
        let log_J = F.determinant().ln();
        (F - F_inv_t) * mu + F_inv_t * (lambda * log_J)
    }

    fn compute_stress_contraction(
        &self,
        deformation_gradient: &Matrix3<T>,
        a: &Vector3<T>,
        b: &Vector3<T>,
        parameters: &Self::Parameters,
    ) -> Matrix3<T> {
        let &LameParameters { mu, lambda } = parameters;
        let F = deformation_gradient;
        let F_inv_t = inverse_transpose_or_nan(F);
        let log_J = F.determinant().ln();
        let ref F_inv_t_a = F_inv_t * a;
        let ref F_inv_t_b = F_inv_t * b;

        Matrix3::identity() * (mu * a.dot(b))
            + outer(F_inv_t_b, F_inv_t_a) * (mu - lambda * log_J)
            + outer(F_inv_t_a, F_inv_t_b) * lambda
    }
}

/// Parameters of the Holzapfel-Ogden model.
///
/// The stiffness-like parameters `a_*` and the penalty `kappa` carry units of stress, the
/// exponents `b_*` are dimensionless. `fiber` and `sheet` are the (unit) reference fiber
/// and sheet directions $\vec f_0$ and $\vec s_0$.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HolzapfelOgdenParameters<T>
where
    T: Real,
{
    pub a_0: T,
    pub b_0: T,
    pub a_f: T,
    pub b_f: T,
    pub a_s: T,
    pub b_s: T,
    pub a_fs: T,
    pub b_fs: T,
    pub kappa: T,
    pub fiber: Vector3<T>,
    pub sheet: Vector3<T>,
}

impl<T> Default for HolzapfelOgdenParameters<T>
where
    T: Real,
{
    /// Passive myocardium parameters in kPa, with fibers along $\vec e_1$ and sheets along $\vec e_2$.
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    fn default() -> Self {
        Self {
            a_0: 0.059,
            b_0: 8.023,
            a_f: 18.472,
            b_f: 16.026,
            a_s: 2.481,
            b_s: 11.120,
            a_fs: 0.216,
            b_fs: 11.436,
            kappa: 1.0e3,
            fiber: Vector3::x(),
            sheet: Vector3::y(),
        }
    }
}

/// The anisotropic Holzapfel-Ogden model for passive myocardium with a volumetric penalty.
///
/// The strain energy density is
/// $$
/// \psi(\vec F) = \frac{a_0}{2 b_0} \left( e^{b_0 (I_1 - 3)} - 1 \right)
///     + \sum_{i \in \\{f, s\\}} \frac{a_i}{2 b_i} \left( e^{b_i (I_{4i} - 1)^2} - 1 \right)
///     + \frac{a_{fs}}{2 b_{fs}} \left( e^{b_{fs} I_{8}^2} - 1 \right)
///     - a_0 \log J
///     + \frac{\kappa}{4} \left( J^2 - 1 - 2 \log J \right),
/// $$
/// with the invariants $I_1 = \tr{\vec C}$, $I_{4f} = \vec f_0 \cdot \vec C \vec f_0$,
/// $I_{4s} = \vec s_0 \cdot \vec C \vec s_0$ and $I_8 = \vec f_0 \cdot \vec C \vec s_0$.
/// The fiber and sheet terms only contribute under tension, $I_{4i} > 1$. The $-a_0 \log J$ term
/// renders the reference configuration stress-free.
///
/// Each invariant term $\psi_I(I)$ contributes $\psi_I' \pd{I}{\vec F}$ to the stress and
/// $$
/// \psi_I'' (\vec A \vec a)(\vec A \vec b)^T + \psi_I' \\, \mathcal{C}_I(\vec a, \vec b)
/// $$
/// to the contraction, where $\vec A = \pd{I}{\vec F}$. The second derivatives of the invariants
/// only act as multiples of the identity: $2 (\vec a \cdot \vec b)$ for $I_1$,
/// $2 (\vec a \cdot \vec f_0)(\vec b \cdot \vec f_0)$ for $I_{4f}$ and
/// $(\vec a \cdot \vec f_0)(\vec b \cdot \vec s_0) + (\vec a \cdot \vec s_0)(\vec b \cdot \vec f_0)$ for $I_8$.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolzapfelOgdenMaterial;

/// Value, first and second derivative of a scalar energy term with respect to its invariant.
struct InvariantTerm<T> {
    psi: T,
    d_psi: T,
    dd_psi: T,
}

#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
impl<T: Real> InvariantTerm<T> {
    fn isotropic(a: T, b: T, i_1: T) -> Self {
        let exp = (b * (i_1 - 3.0)).exp();
        Self {
            psi: a / (2.0 * b) * (exp - 1.0),
            d_psi: 0.5 * a * exp,
            dd_psi: 0.5 * a * b * exp,
        }
    }

    /// Exponential term in $(I - I_{ref})$, optionally switched off under compression.
    fn quadratic_exponential(a: T, b: T, shifted_invariant: T, tension_only: bool) -> Self {
        if tension_only && shifted_invariant <= 0.0 {
            return Self {
                psi: 0.0,
                d_psi: 0.0,
                dd_psi: 0.0,
            };
        }
        let x = shifted_invariant;
        let exp = (b * x * x).exp();
        Self {
            psi: a / (2.0 * b) * (exp - 1.0),
            d_psi: a * x * exp,
            dd_psi: a * (1.0 + 2.0 * b * x * x) * exp,
        }
    }
}

#[allow(non_snake_case)]
struct HolzapfelOgdenKinematics<T: Real> {
    J: T,
    F_inv_t: Matrix3<T>,
    Ff: Vector3<T>,
    Fs: Vector3<T>,
    isotropic: InvariantTerm<T>,
    fiber: InvariantTerm<T>,
    sheet: InvariantTerm<T>,
    fiber_sheet: InvariantTerm<T>,
}

#[allow(non_snake_case)]
#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
impl<T: Real> HolzapfelOgdenKinematics<T> {
    fn new(F: &Matrix3<T>, p: &HolzapfelOgdenParameters<T>) -> Self {
        let Ff = F * p.fiber;
        let Fs = F * p.sheet;
        let I_1 = F.norm_squared();
        let I_4f = Ff.norm_squared();
        let I_4s = Fs.norm_squared();
        let I_8 = Ff.dot(&Fs);
        Self {
            J: F.determinant(),
            F_inv_t: inverse_transpose_or_nan(F),
            isotropic: InvariantTerm::isotropic(p.a_0, p.b_0, I_1),
            fiber: InvariantTerm::quadratic_exponential(p.a_f, p.b_f, I_4f - 1.0, true),
            sheet: InvariantTerm::quadratic_exponential(p.a_s, p.b_s, I_4s - 1.0, true),
            fiber_sheet: InvariantTerm::quadratic_exponential(p.a_fs, p.b_fs, I_8, false),
            Ff,
            Fs,
        }
    }
}

#[allow(non_snake_case)]
#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
impl<T> HyperelasticMaterial<T> for HolzapfelOgdenMaterial
where
    T: Real,
{
    type Parameters = HolzapfelOgdenParameters<T>;

    fn compute_energy_density(&self, deformation_gradient: &Matrix3<T>, parameters: &Self::Parameters) -> T {
        let k = HolzapfelOgdenKinematics::new(deformation_gradient, parameters);
        let J = k.J;
        let volumetric = 0.25 * parameters.kappa * (J * J - 1.0 - 2.0 * J.ln()) - parameters.a_0 * J.ln();
        k.isotropic.psi + k.fiber.psi + k.sheet.psi + k.fiber_sheet.psi + volumetric
    }

    fn compute_stress_tensor(&self, deformation_gradient: &Matrix3<T>, parameters: &Self::Parameters) -> Matrix3<T> {
        let F = deformation_gradient;
        let p = parameters;
        let k = HolzapfelOgdenKinematics::new(F, p);
        let J = k.J;

        // dI_1/dF = 2 F, dI_4f/dF = 2 (F f0) x f0, dI_8/dF = (F f0) x s0 + (F s0) x f0
        F * (2.0 * k.isotropic.d_psi)
            + outer(&k.Ff, &p.fiber) * (2.0 * k.fiber.d_psi)
            + outer(&k.Fs, &p.sheet) * (2.0 * k.sheet.d_psi)
            + (outer(&k.Ff, &p.sheet) + outer(&k.Fs, &p.fiber)) * k.fiber_sheet.d_psi
            + k.F_inv_t * (0.5 * p.kappa * (J * J - 1.0) - p.a_0)
    }

    fn compute_stress_contraction(
        &self,
        deformation_gradient: &Matrix3<T>,
        a: &Vector3<T>,
        b: &Vector3<T>,
        parameters: &Self::Parameters,
    ) -> Matrix3<T> {
        let F = deformation_gradient;
        let p = parameters;
        let k = HolzapfelOgdenKinematics::new(F, p);
        let J = k.J;
        let (f0, s0) = (&p.fiber, &p.sheet);

        let (a_f, a_s) = (a.dot(f0), a.dot(s0));
        let (b_f, b_s) = (b.dot(f0), b.dot(s0));

        // (dI/dF) a for each invariant
        let ref A1_a = F * a * 2.0;
        let ref A1_b = F * b * 2.0;
        let ref A4f_a = &k.Ff * (2.0 * a_f);
        let ref A4f_b = &k.Ff * (2.0 * b_f);
        let ref A4s_a = &k.Fs * (2.0 * a_s);
        let ref A4s_b = &k.Fs * (2.0 * b_s);
        let ref A8_a = &k.Ff * a_s + &k.Fs * a_f;
        let ref A8_b = &k.Ff * b_s + &k.Fs * b_f;

        let identity_factor = 2.0 * k.isotropic.d_psi * a.dot(b)
            + 2.0 * k.fiber.d_psi * a_f * b_f
            + 2.0 * k.sheet.d_psi * a_s * b_s
            + k.fiber_sheet.d_psi * (a_f * b_s + a_s * b_f);

        let ref F_inv_t_a = k.F_inv_t * a;
        let ref F_inv_t_b = k.F_inv_t * b;
        let volumetric = outer(F_inv_t_a, F_inv_t_b) * (p.kappa * J * J)
            - outer(F_inv_t_b, F_inv_t_a) * (0.5 * p.kappa * (J * J - 1.0) - p.a_0);

        Matrix3::identity() * identity_factor
            + outer(A1_a, A1_b) * k.isotropic.dd_psi
            + outer(A4f_a, A4f_b) * k.fiber.dd_psi
            + outer(A4s_a, A4s_b) * k.sheet.dd_psi
            + outer(A8_a, A8_b) * k.fiber_sheet.dd_psi
            + volumetric
    }
}
