use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::AppError;

/**
 * \brief 可互换上游凭据的轮询池。
 * \details 凭据池在构造时确定。游标始终位于 `0..pool.len()`，
 *          每次 `next()` 前进一位。
 */
#[derive(Debug)]
pub struct CredentialRotator {
    pool: Vec<String>,
    cursor: AtomicUsize,
}

impl CredentialRotator {
    /**
     * \brief 由原始槽位构建凭据池，丢弃缺失或空白项。
     * \return 过滤后没有可用凭据时返回 `AppError::Configuration`
     */
    pub fn initialize<I, S>(raw: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        let pool: Vec<String> = raw
            .into_iter()
            .flatten()
            .map(Into::into)
            .filter(|token: &String| !token.trim().is_empty())
            .collect();

        if pool.is_empty() {
            return Err(AppError::Configuration(
                "no inference credentials configured; set GITHUB_TOKEN_1, GITHUB_TOKEN_2 or GITHUB_TOKEN_3"
                    .to_string(),
            ));
        }

        Ok(Self {
            pool,
            cursor: AtomicUsize::new(0),
        })
    }

    /**
     * \brief 返回游标处的凭据并前进游标。
     */
    pub fn next(&self) -> &str {
        let len = self.pool.len();
        let idx = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some((cur + 1) % len)
            })
            .unwrap_or(0);
        &self.pool[idx]
    }

    /**
     * \brief 返回固定在 `index` 的凭据；该槽位缺失时回退为轮询。
     */
    pub fn at(&self, index: usize) -> &str {
        match self.pool.get(index) {
            Some(token) => token,
            None => self.next(),
        }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    #[cfg(test)]
    fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }
}
